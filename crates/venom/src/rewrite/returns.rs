//! Return normalization.
//!
//! Void functions get an explicit `return` appended to the end of their
//! body. For non-void functions, a tail-position expression statement is
//! rewritten into `return <expr>` to simplify code generation.

use crate::{
    analysis::{context::Program, scope::ScopeId},
    ast::{ReturnStmt, Stmt, StmtList},
    error::CompileResult,
    rewrite::reanalyzer,
};

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let mut pass = Returns { program, module };
    // the module list itself holds only declarations at this point
    for stmt in &mut ast.stmts {
        pass.run_stmt(stmt)?;
    }
    Ok(())
}

struct Returns<'p> {
    program: &'p mut Program,
    module: &'p str,
}

impl Returns<'_> {
    fn run_stmt(&mut self, stmt: &mut Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::ClassDecl(s) => {
                for kid in &mut s.body.stmts {
                    self.run_stmt(kid)?;
                }
                Ok(())
            }
            Stmt::FuncDecl(s) => {
                if !s.type_params.is_empty() {
                    return Ok(());
                }
                // nested declarations are gone after lifting; only the body
                // itself needs treatment
                let func = s.sym.expect("registered function");
                let ret = self.program.syms.func(func).ret;
                if ret == self.program.prelude.void {
                    // an explicit trailing return never changes semantics
                    // for a void function
                    s.body.stmts.push(Stmt::Return(ReturnStmt {
                        value: None,
                        loc: s.loc,
                    }));
                } else {
                    self.rewrite_tail(&mut s.body)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn rewrite_tail(&mut self, list: &mut StmtList) -> CompileResult<()> {
        let scope = list.scope.expect("scope set before rewrites");
        let Some(last) = list.stmts.last_mut() else {
            list.stmts.push(Stmt::Return(ReturnStmt {
                value: None,
                loc: crate::error::SourceLoc::default(),
            }));
            return Ok(());
        };
        match last {
            Stmt::Expr(_) => {
                let Some(Stmt::Expr(es)) = list.stmts.pop() else {
                    unreachable!()
                };
                let mut ret = Stmt::Return(ReturnStmt {
                    value: Some(es.expr),
                    loc: es.loc,
                });
                self.recheck(&mut ret, scope)?;
                list.stmts.push(ret);
                Ok(())
            }
            Stmt::If(s) => {
                self.rewrite_tail(&mut s.then_body)?;
                self.rewrite_tail(&mut s.else_body)
            }
            _ => Ok(()),
        }
    }

    fn recheck(&mut self, stmt: &mut Stmt, scope: ScopeId) -> CompileResult<()> {
        let mut an = reanalyzer(self.program, self.module);
        an.type_check_stmt(stmt, scope)
    }
}
