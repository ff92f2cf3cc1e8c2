//! Primitive boxing.
//!
//! Wraps any expression whose expected type is `any` but whose static type
//! is a primitive in the matching hidden box constructor, so the value can
//! travel as a reference cell.

use crate::{
    analysis::{context::Program, scope::ScopeId, types::ITypeId},
    ast::{Expr, Stmt, StmtList},
    error::CompileResult,
    rewrite::{reanalyzer, take_expr},
};

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let mut pass = Boxing { program, module };
    pass.run_list(ast)
}

struct Boxing<'p> {
    program: &'p mut Program,
    module: &'p str,
}

impl Boxing<'_> {
    fn run_list(&mut self, list: &mut StmtList) -> CompileResult<()> {
        let scope = list.scope.expect("scope set before rewrites");
        for stmt in &mut list.stmts {
            self.run_stmt(stmt, scope)?;
        }
        Ok(())
    }

    fn run_stmt(&mut self, stmt: &mut Stmt, scope: ScopeId) -> CompileResult<()> {
        match stmt {
            Stmt::ClassDecl(s) => self.run_list(&mut s.body),
            Stmt::FuncDecl(s) => {
                if !s.type_params.is_empty() {
                    return Ok(());
                }
                self.run_list(&mut s.body)
            }
            Stmt::ClassAttrDecl(s) => match &mut s.init {
                Some(init) => self.run_expr(init, scope),
                None => Ok(()),
            },
            Stmt::Assign(s) => {
                self.run_expr(&mut s.lhs, scope)?;
                self.run_expr(&mut s.rhs, scope)
            }
            Stmt::If(s) => {
                self.run_expr(&mut s.cond, scope)?;
                self.run_list(&mut s.then_body)?;
                self.run_list(&mut s.else_body)
            }
            Stmt::For(s) => {
                self.run_expr(&mut s.iter, scope)?;
                self.run_list(&mut s.body)
            }
            Stmt::Return(s) => match &mut s.value {
                Some(v) => self.run_expr(v, scope),
                None => Ok(()),
            },
            Stmt::Expr(s) => self.run_expr(&mut s.expr, scope),
            Stmt::Import(_) => Ok(()),
        }
    }

    fn run_expr(&mut self, expr: &mut Expr, scope: ScopeId) -> CompileResult<()> {
        match expr {
            Expr::UnOp(e) => self.run_expr(&mut e.operand, scope)?,
            Expr::BinOp(e) => {
                self.run_expr(&mut e.lhs, scope)?;
                self.run_expr(&mut e.rhs, scope)?;
            }
            Expr::AttrAccess(e) => self.run_expr(&mut e.primary, scope)?,
            Expr::ArrayAccess(e) => {
                self.run_expr(&mut e.primary, scope)?;
                self.run_expr(&mut e.index, scope)?;
            }
            Expr::Call(e) => {
                self.run_expr(&mut e.callee, scope)?;
                for a in &mut e.args {
                    self.run_expr(a, scope)?;
                }
            }
            Expr::ListLit(e) => {
                for a in &mut e.elems {
                    self.run_expr(a, scope)?;
                }
            }
            Expr::MapLit(e) => {
                for (k, v) in &mut e.pairs {
                    self.run_expr(k, scope)?;
                    self.run_expr(v, scope)?;
                }
            }
            Expr::AssignExpr(e) => {
                self.run_expr(&mut e.lhs, scope)?;
                self.run_expr(&mut e.rhs, scope)?;
            }
            Expr::ExprList(e) => {
                for a in &mut e.exprs {
                    self.run_expr(a, scope)?;
                }
            }
            _ => {}
        }

        let info = expr.info();
        let (Some(static_ty), Some(expected)) = (info.static_ty, info.expected_ty) else {
            return Ok(());
        };
        if expected != self.program.prelude.any || !self.program.is_primitive(static_ty) {
            return Ok(());
        }
        let box_name = self.box_class_name(static_ty);
        let loc = info.loc;
        let inner = take_expr(expr);
        *expr = Expr::call(Expr::ident(box_name, loc), vec![inner], loc);
        let any = self.program.prelude.any;
        let mut an = reanalyzer(self.program, self.module);
        an.type_check_expr(expr, scope, Some(any))?;
        Ok(())
    }

    fn box_class_name(&self, primitive: ITypeId) -> &'static str {
        let base = self.program.types.base(primitive);
        if base == self.program.prelude.int_t {
            "<Int>"
        } else if base == self.program.prelude.float_t {
            "<Float>"
        } else {
            "<Bool>"
        }
    }
}
