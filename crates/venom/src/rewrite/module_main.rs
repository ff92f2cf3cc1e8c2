//! Module-main extraction.
//!
//! Moves every top-level statement that is not a function or class
//! declaration into a synthetic `<main>` function, so the module statement
//! list contains only declarations plus `<main>`. `<main>` shares the
//! module-level scope: top-level variables stay module-level symbols.

use crate::{
    analysis::{
        context::Program,
        scope::ScopeOwner,
        symbol::MAIN_NAME,
    },
    ast::{FuncDeclStmt, Stmt, StmtList},
    error::CompileResult,
};

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let module_scope = ast.scope.expect("module scope");

    let mut decls = Vec::new();
    let mut main_stmts = Vec::new();
    for stmt in ast.stmts.drain(..) {
        match stmt {
            Stmt::FuncDecl(_) | Stmt::ClassDecl(_) => decls.push(stmt),
            other => main_stmts.push(other),
        }
    }

    // <main> is a strange function when it comes to its symbol table: its
    // body scope IS the module scope, so its statements keep addressing
    // module-level symbols
    let void = program.prelude.void;
    let main_sym = program.create_func_symbol(
        module_scope,
        MAIN_NAME,
        module_scope,
        Vec::new(),
        Vec::new(),
        void,
        false,
        None,
        false,
    );
    program.scopes.get_mut(module_scope).owner = ScopeOwner::Module;

    let mut body = StmtList::new(main_stmts);
    body.scope = Some(module_scope);
    decls.push(Stmt::FuncDecl(FuncDeclStmt {
        name: MAIN_NAME.to_owned(),
        type_params: Vec::new(),
        params: Vec::new(),
        ret: None,
        body,
        is_ctor: false,
        loc: crate::error::SourceLoc::default(),
        sym: Some(main_sym),
        type_param_itypes: Vec::new(),
        instantiation_args: Vec::new(),
    }));
    ast.stmts = decls;
    let _ = module;
    Ok(())
}
