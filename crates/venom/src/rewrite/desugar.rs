//! Desugaring.
//!
//! List literals become a constructor call plus `append` calls on a fresh
//! temporary; dict literals become a `map` constructor plus `set` calls.
//! Class-attribute initializers are copied into the constructor body
//! immediately after the super-constructor call.

use crate::{
    analysis::{context::Program, scope::ScopeId, symbol::CTOR_NAME},
    ast::{
        AssignExprNode, AssignStmt, Expr, ExprListExpr, NodeInfo, Stmt, StmtList, TypeSpec,
    },
    error::CompileResult,
    rewrite::{reanalyzer, take_expr},
};

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let mut pass = Desugar { program, module };
    pass.run_list(ast)?;
    Ok(())
}

struct Desugar<'p> {
    program: &'p mut Program,
    module: &'p str,
}

impl Desugar<'_> {
    fn run_list(&mut self, list: &mut StmtList) -> CompileResult<()> {
        let scope = list.scope.expect("scope set before rewrites");
        // move attribute initializers into the constructor first, so they
        // desugar in the constructor's scope below
        self.move_attr_inits(list)?;
        for i in 0..list.stmts.len() {
            self.run_stmt(&mut list.stmts[i], scope)?;
        }
        Ok(())
    }

    fn run_stmt(&mut self, stmt: &mut Stmt, scope: ScopeId) -> CompileResult<()> {
        match stmt {
            Stmt::ClassDecl(s) => self.run_list(&mut s.body),
            Stmt::FuncDecl(s) => self.run_list(&mut s.body),
            Stmt::ClassAttrDecl(s) => {
                if let Some(init) = &mut s.init {
                    self.run_expr(init, scope)?;
                }
                Ok(())
            }
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
        // children first, so nested literals desugar bottom-up
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

        match expr {
            Expr::ListLit(_) => self.desugar_list_literal(expr, scope),
            Expr::MapLit(_) => self.desugar_map_literal(expr, scope),
            _ => Ok(()),
        }
    }

    /// `[e1, e2, ...]` becomes `(t = list{T}(); t.append(e1); ...; t)`.
    fn desugar_list_literal(&mut self, expr: &mut Expr, scope: ScopeId) -> CompileResult<()> {
        let Expr::ListLit(lit) = take_expr(expr) else {
            unreachable!()
        };
        let info = lit.info;
        let list_ty = info.static_ty.expect("literal typed before desugar");
        let elem_ty = self.program.types.params(list_ty)[0];
        let loc = info.loc;

        let tmp = format!("$list{}", self.program.unique_id());
        self.program
            .create_var_symbol(scope, &tmp, Some(list_ty), None, false);

        let mut exprs = Vec::with_capacity(lit.elems.len() + 2);
        let ctor = Expr::Call(crate::ast::CallExpr {
            callee: Box::new(Expr::ident("list", loc)),
            type_args: vec![TypeSpec::synthetic(elem_ty)],
            args: Vec::new(),
            info: NodeInfo::at(loc),
        });
        exprs.push(Expr::AssignExpr(AssignExprNode {
            lhs: Box::new(Expr::ident(&*tmp, loc)),
            rhs: Box::new(ctor),
            info: NodeInfo::at(loc),
        }));
        for elem in lit.elems {
            exprs.push(Expr::call(
                Expr::attr(Expr::ident(&*tmp, loc), "append", loc),
                vec![elem],
                loc,
            ));
        }
        exprs.push(Expr::ident(&*tmp, loc));

        *expr = Expr::ExprList(ExprListExpr {
            exprs,
            info: NodeInfo::at(loc),
        });
        let expected = info.expected_ty;
        let mut an = reanalyzer(self.program, self.module);
        an.type_check_expr(expr, scope, expected)?;
        Ok(())
    }

    /// `{k1: v1, ...}` becomes `(t = map{K,V}(); t.set(k1, v1); ...; t)`.
    fn desugar_map_literal(&mut self, expr: &mut Expr, scope: ScopeId) -> CompileResult<()> {
        let Expr::MapLit(lit) = take_expr(expr) else {
            unreachable!()
        };
        let info = lit.info;
        let map_ty = info.static_ty.expect("literal typed before desugar");
        let key_ty = self.program.types.params(map_ty)[0];
        let value_ty = self.program.types.params(map_ty)[1];
        let loc = info.loc;

        let tmp = format!("$map{}", self.program.unique_id());
        self.program
            .create_var_symbol(scope, &tmp, Some(map_ty), None, false);

        let mut exprs = Vec::with_capacity(lit.pairs.len() + 2);
        let ctor = Expr::Call(crate::ast::CallExpr {
            callee: Box::new(Expr::ident("map", loc)),
            type_args: vec![TypeSpec::synthetic(key_ty), TypeSpec::synthetic(value_ty)],
            args: Vec::new(),
            info: NodeInfo::at(loc),
        });
        exprs.push(Expr::AssignExpr(AssignExprNode {
            lhs: Box::new(Expr::ident(&*tmp, loc)),
            rhs: Box::new(ctor),
            info: NodeInfo::at(loc),
        }));
        for (k, v) in lit.pairs {
            exprs.push(Expr::call(
                Expr::attr(Expr::ident(&*tmp, loc), "set", loc),
                vec![k, v],
                loc,
            ));
        }
        exprs.push(Expr::ident(&*tmp, loc));

        *expr = Expr::ExprList(ExprListExpr {
            exprs,
            info: NodeInfo::at(loc),
        });
        let expected = info.expected_ty;
        let mut an = reanalyzer(self.program, self.module);
        an.type_check_expr(expr, scope, expected)?;
        Ok(())
    }

    /// Moves `attr x :: T = e` initializers into the constructor body,
    /// right after the super-constructor call.
    fn move_attr_inits(&mut self, list: &mut StmtList) -> CompileResult<()> {
        let mut inits = Vec::new();
        for stmt in &mut list.stmts {
            if let Stmt::ClassAttrDecl(attr) = stmt
                && let Some(init) = attr.init.take()
            {
                inits.push((attr.name.clone(), init));
            }
        }
        if inits.is_empty() {
            return Ok(());
        }
        let ctor = list.stmts.iter_mut().find_map(|s| match s {
            Stmt::FuncDecl(f) if f.name == CTOR_NAME || f.is_ctor => Some(f),
            _ => None,
        });
        let Some(ctor) = ctor else {
            return Ok(());
        };
        let ctor_scope = ctor.body.scope.expect("ctor body scope");
        // position 0 is the super-constructor call
        for (i, (name, init)) in inits.into_iter().enumerate() {
            let loc = init.loc();
            let mut stmt = Stmt::Assign(AssignStmt {
                lhs: Expr::attr(Expr::SelfExpr(NodeInfo::at(loc)), name, loc),
                rhs: init,
                loc,
                decl: false,
            });
            let mut an = reanalyzer(self.program, self.module);
            an.type_check_stmt(&mut stmt, ctor_scope)?;
            ctor.body.stmts.insert(1 + i, stmt);
        }
        Ok(())
    }
}
