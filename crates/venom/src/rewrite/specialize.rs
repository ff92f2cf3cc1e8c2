//! Type-parameter specialization (monomorphization).
//!
//! Type checking records every fully-instantiated type-argument tuple used
//! with a parameterized function or class. This pass clones each such
//! declaration through a template clone, renames it to the canonical
//! mangled name, and inserts the monomorphized copy immediately after its
//! generic origin. Re-checking a monomorphized body can demand further
//! tuples, so the pass iterates to a fixed point.

use ahash::AHashSet;

use crate::{
    analysis::{
        context::{PRELUDE_MODULE, Program},
        scope::ScopeId,
        symbol::{ClassId, FuncId},
        types::{ITypeId, TypeTranslator},
    },
    ast::{Stmt, StmtList},
    error::{CompileError, CompileResult},
    rewrite::reanalyzer,
};

pub fn run(program: &mut Program) -> CompileResult<()> {
    let mut done_funcs: AHashSet<(FuncId, Vec<ITypeId>)> = AHashSet::new();
    let mut done_classes: AHashSet<ITypeId> = AHashSet::new();

    loop {
        let mut pending_funcs = Vec::new();
        for (&func, tuples) in &program.func_specs {
            for tuple in tuples {
                if !done_funcs.contains(&(func, tuple.clone())) {
                    pending_funcs.push((func, tuple.clone()));
                }
            }
        }
        let mut pending_classes = Vec::new();
        for (&class, itypes) in &program.class_specs {
            for &it in itypes {
                if !done_classes.contains(&it) {
                    pending_classes.push((class, it));
                }
            }
        }
        if pending_funcs.is_empty() && pending_classes.is_empty() {
            return Ok(());
        }

        for (func, args) in pending_funcs {
            done_funcs.insert((func, args.clone()));
            materialize_func(program, func, &args)?;
        }
        for (class, it) in pending_classes {
            done_classes.insert(it);
            materialize_class(program, class, it)?;
        }
        program.invalidate_layouts();
    }
}

fn materialize_func(program: &mut Program, func: FuncId, args: &[ITypeId]) -> CompileResult<()> {
    let f = program.syms.func(func);
    if f.native || f.type_params.is_empty() {
        return Ok(());
    }
    if f.is_method() {
        return Err(CompileError::semantic(format!(
            "Type-parameterized methods are not supported: {}",
            f.name
        )));
    }
    let module = program.scope_module(f.defined_in).to_owned();
    if module == PRELUDE_MODULE {
        return Ok(());
    }
    let bf = crate::analysis::symbol::BoundFunction::new(func, args.to_vec());
    if program.find_specialized_func(&bf).is_some() {
        return Ok(());
    }

    let mangled = program.mangled_func_name(func, args);
    let mut t = TypeTranslator::new();
    t.bind_pairs(&program.syms.func(func).type_params.clone(), args);

    with_module_ast(program, &module, |program, ast| {
        let inserted = insert_clone_after(
            program,
            &module,
            ast,
            &|stmt| matches!(stmt, Stmt::FuncDecl(d) if d.sym == Some(func)),
            &mut |program, origin, scope| {
                let Stmt::FuncDecl(mut clone) =
                    origin.clone_for_template(&mut program.types, &t)
                else {
                    unreachable!()
                };
                clone.name = mangled.clone();
                clone.type_params = Vec::new();
                clone.instantiation_args = args.to_vec();
                let mut stmt = Stmt::FuncDecl(clone);
                check_inserted(program, &module, &mut stmt, scope)?;
                Ok(stmt)
            },
        )?;
        if !inserted {
            return Err(CompileError::semantic(format!(
                "Cannot locate generic origin of {mangled}"
            )));
        }
        Ok(())
    })
}

fn materialize_class(program: &mut Program, class: ClassId, it: ITypeId) -> CompileResult<()> {
    let c = program.syms.class(class);
    if c.type_params.is_empty() {
        return Ok(());
    }
    let module = program.scope_module(c.defined_in).to_owned();
    if module == PRELUDE_MODULE {
        return Ok(());
    }
    let mangled = program.types.stringify(it);
    {
        let def_scope = program.syms.class(class).defined_in;
        let mut tt = TypeTranslator::new();
        if program
            .scopes
            .find_class(def_scope, &mangled, crate::analysis::scope::RecurseMode::NoRecurse, &mut tt)
            .is_some()
        {
            return Ok(());
        }
    }

    let mut t = TypeTranslator::new();
    t.bind(&program.types, it);

    with_module_ast(program, &module, |program, ast| {
        let inserted = insert_clone_after(
            program,
            &module,
            ast,
            &|stmt| matches!(stmt, Stmt::ClassDecl(d) if d.sym == Some(class)),
            &mut |program, origin, scope| {
                let Stmt::ClassDecl(mut clone) =
                    origin.clone_for_template(&mut program.types, &t)
                else {
                    unreachable!()
                };
                clone.name = mangled.clone();
                clone.type_params = Vec::new();
                clone.instantiation_of = Some(it);
                let mut stmt = Stmt::ClassDecl(clone);
                check_inserted(program, &module, &mut stmt, scope)?;
                Ok(stmt)
            },
        )?;
        if !inserted {
            return Err(CompileError::semantic(format!(
                "Cannot locate generic origin of {mangled}"
            )));
        }
        Ok(())
    })
}

fn check_inserted(
    program: &mut Program,
    module: &str,
    stmt: &mut Stmt,
    scope: ScopeId,
) -> CompileResult<()> {
    let mut an = reanalyzer(program, module);
    an.init_scopes_stmt(stmt, scope);
    an.semantic_check_stmt(stmt, scope, true)?;
    an.type_check_stmt(stmt, scope)?;
    Ok(())
}

fn with_module_ast(
    program: &mut Program,
    module: &str,
    f: impl FnOnce(&mut Program, &mut StmtList) -> CompileResult<()>,
) -> CompileResult<()> {
    let mut ast = program
        .modules
        .get_mut(module)
        .expect("registered module")
        .ast
        .take()
        .expect("module AST present");
    let result = f(program, &mut ast);
    program.modules.get_mut(module).expect("registered module").ast = Some(ast);
    result
}

/// Finds the first statement matching `pred` anywhere in the tree and
/// inserts `make`'s result immediately after it in the same list.
fn insert_clone_after(
    program: &mut Program,
    module: &str,
    list: &mut StmtList,
    pred: &dyn Fn(&Stmt) -> bool,
    make: &mut dyn FnMut(&mut Program, &Stmt, ScopeId) -> CompileResult<Stmt>,
) -> CompileResult<bool> {
    let scope = list.scope.expect("scope set before rewrites");
    let mut i = 0;
    while i < list.stmts.len() {
        if pred(&list.stmts[i]) {
            let clone = make(program, &list.stmts[i], scope)?;
            list.stmts.insert(i + 1, clone);
            return Ok(true);
        }
        let found = match &mut list.stmts[i] {
            Stmt::ClassDecl(s) => insert_clone_after(program, module, &mut s.body, pred, make)?,
            Stmt::FuncDecl(s) => insert_clone_after(program, module, &mut s.body, pred, make)?,
            Stmt::If(s) => {
                insert_clone_after(program, module, &mut s.then_body, pred, make)?
                    || insert_clone_after(program, module, &mut s.else_body, pred, make)?
            }
            Stmt::For(s) => insert_clone_after(program, module, &mut s.body, pred, make)?,
            _ => false,
        };
        if found {
            return Ok(true);
        }
        i += 1;
    }
    Ok(false)
}
