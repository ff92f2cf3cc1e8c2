//! Canonical references.
//!
//! Rewrites a bare name `x` into `self.x` when it resolves to a field or
//! method of the innermost enclosing class, and into `<module>.x` when it
//! resolves to a module-level variable or function. Downstream passes can
//! then assume every such access has an explicit receiver.
//!
//! Members of an *enclosing* (non-innermost) class are left bare; the
//! lifting pass turns those into `<outer>` chains when the nested class is
//! lifted out.

use crate::{
    analysis::{context::Program, scope::ScopeId, scope::ScopeOwner},
    ast::{Expr, NodeInfo, Stmt, StmtList, SymbolRef},
    error::CompileResult,
    rewrite::{reanalyzer, take_expr},
};

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let mut pass = Canon { program, module };
    pass.run_list(ast)
}

struct Canon<'p> {
    program: &'p mut Program,
    module: &'p str,
}

impl Canon<'_> {
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
            Stmt::FuncDecl(s) => self.run_list(&mut s.body),
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

        let Expr::Ident(var) = expr else {
            return Ok(());
        };
        let Some(sym) = var.info.sym else {
            return Ok(());
        };
        let loc = var.info.loc;
        let name = var.name.clone();

        enum Target {
            SelfAttr,
            ModuleAttr,
        }
        let target = match sym {
            SymbolRef::Var(v) => {
                let vs = self.program.syms.var(v);
                if vs.owner_class.is_some() {
                    if self.member_of_self_class(scope, &name, sym) {
                        Some(Target::SelfAttr)
                    } else {
                        // a lexically enclosing class's member; the lifting
                        // pass threads these through `<outer>`
                        None
                    }
                } else if self
                    .program
                    .scopes
                    .get(vs.defined_in)
                    .is_module_scope()
                {
                    Some(Target::ModuleAttr)
                } else {
                    None
                }
            }
            SymbolRef::Func(f) => {
                let fs = self.program.syms.func(f);
                if fs.owner_class.is_some() {
                    if self.member_of_self_class(scope, &name, sym) {
                        Some(Target::SelfAttr)
                    } else {
                        None
                    }
                } else if self
                    .program
                    .scopes
                    .get(fs.defined_in)
                    .is_module_scope()
                {
                    Some(Target::ModuleAttr)
                } else {
                    None
                }
            }
            SymbolRef::Class(_) | SymbolRef::Module(_) => None,
        };
        let Some(target) = target else {
            return Ok(());
        };

        let expected = expr.info().expected_ty;
        let type_args = expr.info().type_args.clone();
        let old = take_expr(expr);
        let _ = old;
        let mut replacement = match target {
            Target::SelfAttr => Expr::attr(Expr::SelfExpr(NodeInfo::at(loc)), name, loc),
            Target::ModuleAttr => {
                Expr::attr(Expr::ident(self.module.to_owned(), loc), name, loc)
            }
        };
        replacement.info_mut().type_args = type_args;
        *expr = replacement;
        let mut an = reanalyzer(self.program, self.module);
        an.type_check_expr(expr, scope, expected)?;
        Ok(())
    }

    /// True when the resolved member is reachable from the innermost
    /// enclosing class through its inheritance chain, so `self.x` names it.
    fn member_of_self_class(&self, scope: ScopeId, name: &str, sym: SymbolRef) -> bool {
        let Some(class_scope) = self.program.scopes.enclosing_class_scope(scope) else {
            return false;
        };
        debug_assert!(matches!(
            self.program.scopes.get(class_scope).owner,
            ScopeOwner::Class(_)
        ));
        let mut t = crate::analysis::types::TypeTranslator::new();
        let found = self.program.scopes.find_base_symbol(
            class_scope,
            name,
            crate::analysis::scope::SymKind::LOCATION | crate::analysis::scope::SymKind::FUNCTION,
            crate::analysis::scope::RecurseMode::ClassLookup,
            &mut t,
        );
        found == Some(sym)
    }
}
