//! Closure conversion ("lifting").
//!
//! Every function or class declared inside another function or class is
//! replaced by a top-level clone with a fresh globally-unique name. Captured
//! enclosing-scope variables become `<ref>{T}` parameters (functions) or
//! private `<ref>{T}` fields (classes); inside the clone every captured read
//! goes through `.value`. In the original scope, declaring assignments of
//! captured variables first allocate the ref cell, and callers of the lifted
//! entity pass the matching refs. A class lifted out of a class additionally
//! gains an `<outer>` field initialized from the enclosing instance, and
//! reaches enclosing members through a chain of `<outer>` hops.

use indexmap::IndexMap;

use crate::{
    analysis::{
        context::Program,
        scope::{ScopeId, ScopeOwner},
        symbol::{ClassId, FuncId, OUTER_NAME, VarId},
        types::ITypeId,
    },
    ast::{
        AssignExprNode, CallExpr, ClassAttrDeclStmt, Expr, ExprListExpr, ExprStmt, NodeInfo,
        ParamDecl, Stmt, StmtList, SymbolRef, TypeSpec,
    },
    error::{CompileResult, SourceLoc},
    rewrite::{reanalyzer, take_expr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LiftKey {
    Func(FuncId),
    Class(ClassId),
}

#[derive(Debug)]
struct LiftEntry {
    lifted_name: String,
    refs: Vec<VarId>,
    /// For classes lifted out of a class: the enclosing class body scope
    /// whose instance must be threaded as `<outer>`.
    outer_scope: Option<ScopeId>,
}

type LiftMap = IndexMap<LiftKey, LiftEntry>;

/// State threaded through capture collection and clone-for-lift for one
/// declaration being lifted.
struct LiftCtx<'m> {
    target: LiftKey,
    lifted_name: String,
    /// Scope of the statement list the declaration is being removed from.
    defined_in: ScopeId,
    /// Body scope of the declaration itself.
    decl_scope: ScopeId,
    lifting_class: bool,
    /// For classes nested in classes: the enclosing class body scope.
    outer_scope: Option<ScopeId>,
    /// Captured symbols in discovery order; may grow during cloning when a
    /// call to an already-lifted sibling threads its refs through.
    refs: Vec<VarId>,
    /// Siblings already lifted out of the same list.
    lift_map: &'m LiftMap,
    /// Class boundaries crossed so far during the clone walk.
    class_depth: usize,
}

pub fn run(program: &mut Program, module: &str, ast: &mut StmtList) -> CompileResult<()> {
    let lift_into = ast.scope.expect("module scope");
    let mut pass = Lift {
        program,
        module,
        lift_into,
    };
    // lift nested declarations out of every top-level statement, inserting
    // the lifted clones before their origin
    let mut i = 0;
    while i < ast.stmts.len() {
        if ast.stmts[i].is_type_parameterized() {
            i += 1;
            continue;
        }
        let mut lifted = Vec::new();
        pass.lift_inside_stmt(&mut ast.stmts[i], &mut lifted)?;
        let n = lifted.len();
        for (k, stmt) in lifted.into_iter().enumerate() {
            ast.stmts.insert(i + k, stmt);
        }
        i += n + 1;
    }
    Ok(())
}

struct Lift<'p> {
    program: &'p mut Program,
    module: &'p str,
    lift_into: ScopeId,
}

impl Lift<'_> {
    /// Lifts nested declarations out of the bodies inside `stmt`,
    /// accumulating the registered top-level clones into `out`.
    fn lift_inside_stmt(&mut self, stmt: &mut Stmt, out: &mut Vec<Stmt>) -> CompileResult<()> {
        match stmt {
            Stmt::FuncDecl(s) => {
                let (map, refs) = self.collect_list(&mut s.body, false, out)?;
                let prepends = self.promote_captured_params(s, &refs)?;
                self.rewrite_list(&mut s.body, &map, &refs)?;
                let body_scope = s.body.scope.expect("func body scope");
                for (k, mut p) in prepends.into_iter().enumerate() {
                    let mut an = reanalyzer(self.program, self.module);
                    an.type_check_stmt(&mut p, body_scope)?;
                    s.body.stmts.insert(k, p);
                }
                Ok(())
            }
            Stmt::ClassDecl(s) => {
                let (map, refs) = self.collect_list(&mut s.body, true, out)?;
                self.rewrite_list(&mut s.body, &map, &refs)?;
                Ok(())
            }
            Stmt::If(s) => {
                self.lift_block(&mut s.then_body, out)?;
                self.lift_block(&mut s.else_body, out)
            }
            Stmt::For(s) => self.lift_block(&mut s.body, out),
            _ => Ok(()),
        }
    }

    fn lift_block(&mut self, list: &mut StmtList, out: &mut Vec<Stmt>) -> CompileResult<()> {
        let (map, refs) = self.collect_list(list, false, out)?;
        self.rewrite_list(list, &map, &refs)
    }

    /// Recurses into deeper scopes first, then lifts this list's own
    /// function/class declarations out. Clones are registered at module
    /// level immediately and accumulated into `out`; this level's lift map
    /// and captured symbols come back for the caller's rewrite.
    fn collect_list(
        &mut self,
        list: &mut StmtList,
        exclude_functions: bool,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<(LiftMap, Vec<VarId>)> {
        let scope = list.scope.expect("scope set before rewrites");

        // deeper nests first
        for stmt in &mut list.stmts {
            if stmt.is_type_parameterized() {
                continue;
            }
            self.lift_inside_stmt(stmt, out)?;
        }

        let mut lift_map = LiftMap::new();
        let mut all_refs: Vec<VarId> = Vec::new();

        let mut i = 0;
        while i < list.stmts.len() {
            let liftable = match &list.stmts[i] {
                Stmt::FuncDecl(f) => {
                    !exclude_functions && !f.is_ctor && !list.stmts[i].is_type_parameterized()
                }
                Stmt::ClassDecl(_) => !list.stmts[i].is_type_parameterized(),
                _ => false,
            };
            if !liftable {
                i += 1;
                continue;
            }
            let stmt = list.stmts.remove(i);
            let (key, name, decl_scope, is_class) = match &stmt {
                Stmt::FuncDecl(f) => (
                    LiftKey::Func(f.sym.expect("registered")),
                    f.name.clone(),
                    f.body.scope.expect("body scope"),
                    false,
                ),
                Stmt::ClassDecl(c) => (
                    LiftKey::Class(c.sym.expect("registered")),
                    c.name.clone(),
                    c.body.scope.expect("body scope"),
                    true,
                ),
                _ => unreachable!(),
            };
            let lifted_name = format!("{name}$lifted_{}", self.program.unique_id());
            let outer_scope = if is_class {
                self.program.scopes.enclosing_class_scope(scope)
            } else {
                None
            };
            let mut ctx = LiftCtx {
                target: key,
                lifted_name: lifted_name.clone(),
                defined_in: scope,
                decl_scope,
                lifting_class: is_class,
                outer_scope,
                refs: Vec::new(),
                lift_map: &lift_map,
                class_depth: 0,
            };
            self.collect_refs_stmt(&stmt, &mut ctx);

            let mut clone = self.clone_stmt(&stmt, &mut ctx)?;
            let refs = ctx.refs;

            // register and check the clone at module level
            {
                let lift_into = self.lift_into;
                let mut an = reanalyzer(self.program, self.module);
                an.init_scopes_stmt(&mut clone, lift_into);
                an.semantic_check_stmt(&mut clone, lift_into, true)?;
            }
            if let (LiftKey::Class(orig), Stmt::ClassDecl(c)) = (key, &clone) {
                let new_class = c.sym.expect("registered clone");
                self.program.syms.class_mut(orig).lifted = Some(new_class);
                self.program.syms.class_mut(new_class).lifter = Some(orig);
                self.program.invalidate_layouts();
            }
            {
                let lift_into = self.lift_into;
                let mut an = reanalyzer(self.program, self.module);
                an.type_check_stmt(&mut clone, lift_into)?;
            }

            for &r in &refs {
                if !all_refs.contains(&r) {
                    all_refs.push(r);
                }
            }
            lift_map.insert(
                key,
                LiftEntry {
                    lifted_name,
                    refs,
                    outer_scope,
                },
            );
            out.push(clone);
        }
        Ok((lift_map, all_refs))
    }

    // ------------------------------------------------------------------
    // capture collection
    // ------------------------------------------------------------------

    fn collect_refs_stmt(&mut self, stmt: &Stmt, ctx: &mut LiftCtx<'_>) {
        match stmt {
            Stmt::ClassDecl(s) => {
                for kid in &s.body.stmts {
                    self.collect_refs_stmt(kid, ctx);
                }
            }
            Stmt::FuncDecl(s) => {
                for kid in &s.body.stmts {
                    self.collect_refs_stmt(kid, ctx);
                }
            }
            Stmt::ClassAttrDecl(s) => {
                if let Some(init) = &s.init {
                    self.collect_refs_expr(init, ctx);
                }
            }
            Stmt::Assign(s) => {
                self.collect_refs_expr(&s.lhs, ctx);
                self.collect_refs_expr(&s.rhs, ctx);
            }
            Stmt::If(s) => {
                self.collect_refs_expr(&s.cond, ctx);
                for kid in &s.then_body.stmts {
                    self.collect_refs_stmt(kid, ctx);
                }
                for kid in &s.else_body.stmts {
                    self.collect_refs_stmt(kid, ctx);
                }
            }
            Stmt::For(s) => {
                self.collect_refs_expr(&s.iter, ctx);
                for kid in &s.body.stmts {
                    self.collect_refs_stmt(kid, ctx);
                }
            }
            Stmt::Return(s) => {
                if let Some(v) = &s.value {
                    self.collect_refs_expr(v, ctx);
                }
            }
            Stmt::Expr(s) => self.collect_refs_expr(&s.expr, ctx),
            Stmt::Import(_) => {}
        }
    }

    fn collect_refs_expr(&mut self, expr: &Expr, ctx: &mut LiftCtx<'_>) {
        match expr {
            Expr::Ident(var) => {
                if let Some(SymbolRef::Var(v)) = var.info.sym
                    && self.is_captured(v, ctx)
                    && !ctx.refs.contains(&v)
                {
                    ctx.refs.push(v);
                }
            }
            Expr::UnOp(e) => self.collect_refs_expr(&e.operand, ctx),
            Expr::BinOp(e) => {
                self.collect_refs_expr(&e.lhs, ctx);
                self.collect_refs_expr(&e.rhs, ctx);
            }
            Expr::AttrAccess(e) => self.collect_refs_expr(&e.primary, ctx),
            Expr::ArrayAccess(e) => {
                self.collect_refs_expr(&e.primary, ctx);
                self.collect_refs_expr(&e.index, ctx);
            }
            Expr::Call(e) => {
                self.collect_refs_expr(&e.callee, ctx);
                for a in &e.args {
                    self.collect_refs_expr(a, ctx);
                }
            }
            Expr::ListLit(e) => {
                for a in &e.elems {
                    self.collect_refs_expr(a, ctx);
                }
            }
            Expr::MapLit(e) => {
                for (k, v) in &e.pairs {
                    self.collect_refs_expr(k, ctx);
                    self.collect_refs_expr(v, ctx);
                }
            }
            Expr::AssignExpr(e) => {
                self.collect_refs_expr(&e.lhs, ctx);
                self.collect_refs_expr(&e.rhs, ctx);
            }
            Expr::ExprList(e) => {
                for a in &e.exprs {
                    self.collect_refs_expr(a, ctx);
                }
            }
            _ => {}
        }
    }

    /// A symbol is captured when it is a plain variable of exactly the
    /// scope the declaration is being removed from. Everything defined
    /// inside the declaration travels with it; object fields reach their
    /// instance another way.
    fn is_captured(&self, v: VarId, ctx: &LiftCtx<'_>) -> bool {
        let vs = self.program.syms.var(v);
        if vs.is_object_field() || vs.ty.is_none() {
            return false;
        }
        if self.program.scopes.belongs_to(vs.defined_in, ctx.decl_scope) {
            return false;
        }
        vs.defined_in == ctx.defined_in
    }

    // ------------------------------------------------------------------
    // clone-for-lift
    // ------------------------------------------------------------------

    fn ref_param_name(ctx: &mut LiftCtx<'_>, program: &Program, v: VarId) -> String {
        let pos = match ctx.refs.iter().position(|&r| r == v) {
            Some(p) => p,
            None => {
                ctx.refs.push(v);
                ctx.refs.len() - 1
            }
        };
        format!("{}$refparam{pos}", program.syms.var(v).name)
    }

    fn ref_type_spec(&mut self, v: VarId) -> TypeSpec {
        let ty = self.program.syms.var(v).ty.expect("captured symbol typed");
        let ty = self.code_gen_itype(ty);
        let refified = self.program.refify(ty);
        TypeSpec::synthetic(refified)
    }

    /// Maps a type to its code-generatable form: lifted classes stand in
    /// for the classes they replaced.
    fn code_gen_itype(&mut self, it: ITypeId) -> ITypeId {
        let base = self.program.types.base(it);
        if let Some(c) = self.program.types.ty(base).class_sym {
            let followed = self.program.syms.follow_lifted_chain(c);
            if followed != c {
                let ty = self.program.syms.class(followed).ty;
                return self.program.types.instantiate0(ty);
            }
        }
        let params: Vec<ITypeId> = self.program.types.params(it).to_vec();
        if params.is_empty() {
            return it;
        }
        let mapped: Vec<ITypeId> = params.iter().map(|&p| self.code_gen_itype(p)).collect();
        self.program.types.instantiate(base, &mapped)
    }

    fn clone_stmt(&mut self, stmt: &Stmt, ctx: &mut LiftCtx<'_>) -> CompileResult<Stmt> {
        match stmt {
            Stmt::FuncDecl(s) => {
                let is_target = matches!(ctx.target, LiftKey::Func(f) if s.sym == Some(f));
                let mut body_stmts = Vec::with_capacity(s.body.stmts.len());
                for kid in &s.body.stmts {
                    if kid.is_type_parameterized() {
                        continue;
                    }
                    body_stmts.push(self.clone_stmt(kid, ctx)?);
                }

                let mut params = Vec::new();
                let func = s.sym.expect("registered");
                let ret = self.program.syms.func(func).ret;
                let takes_refs = (ctx.lifting_class && s.is_ctor)
                    || (!ctx.lifting_class && is_target);
                if takes_refs {
                    if s.is_ctor && ctx.outer_scope.is_some() {
                        // the enclosing instance comes in first
                        let outer = ctx.outer_scope.expect("just checked");
                        let outer_ty = self.class_self_type(outer);
                        params.push(ParamDecl {
                            name: OUTER_NAME.to_owned(),
                            ty: TypeSpec::synthetic(outer_ty),
                            loc: s.loc,
                        });
                        body_stmts.insert(
                            1,
                            assign_stmt(
                                Expr::attr(Expr::SelfExpr(NodeInfo::at(s.loc)), OUTER_NAME, s.loc),
                                Expr::ident(OUTER_NAME, s.loc),
                                s.loc,
                            ),
                        );
                    }
                    let refs_snapshot: Vec<VarId> = ctx.refs.clone();
                    for (k, v) in refs_snapshot.iter().enumerate() {
                        let pname = Self::ref_param_name(ctx, self.program, *v);
                        params.push(ParamDecl {
                            name: pname.clone(),
                            ty: self.ref_type_spec(*v),
                            loc: s.loc,
                        });
                        if s.is_ctor {
                            let insert_at = 1 + usize::from(ctx.outer_scope.is_some()) + k;
                            body_stmts.insert(
                                insert_at,
                                assign_stmt(
                                    Expr::attr(
                                        Expr::SelfExpr(NodeInfo::at(s.loc)),
                                        pname.clone(),
                                        s.loc,
                                    ),
                                    Expr::ident(pname, s.loc),
                                    s.loc,
                                ),
                            );
                        }
                    }
                }
                let param_tys: Vec<ITypeId> = self.program.syms.func(func).params.clone();
                for (p, ty) in s.params.iter().zip(param_tys) {
                    let mapped = self.code_gen_itype(ty);
                    params.push(ParamDecl {
                        name: p.name.clone(),
                        ty: TypeSpec::synthetic(mapped),
                        loc: p.loc,
                    });
                }
                let ret_spec = if ret == self.program.prelude.void {
                    None
                } else {
                    Some(TypeSpec::synthetic(self.code_gen_itype(ret)))
                };
                Ok(Stmt::FuncDecl(crate::ast::FuncDeclStmt {
                    name: if is_target {
                        ctx.lifted_name.clone()
                    } else {
                        s.name.clone()
                    },
                    type_params: Vec::new(),
                    params,
                    ret: ret_spec,
                    body: StmtList::new(body_stmts),
                    is_ctor: s.is_ctor,
                    loc: s.loc,
                    sym: None,
                    type_param_itypes: Vec::new(),
                    instantiation_args: Vec::new(),
                }))
            }
            Stmt::ClassDecl(s) => {
                let is_target = matches!(ctx.target, LiftKey::Class(c) if s.sym == Some(c));
                ctx.class_depth += 1;
                let mut body_stmts = Vec::with_capacity(s.body.stmts.len());
                for kid in &s.body.stmts {
                    if kid.is_type_parameterized() {
                        continue;
                    }
                    body_stmts.push(self.clone_stmt(kid, ctx)?);
                }
                ctx.class_depth -= 1;

                let mut prelude_fields = Vec::new();
                if is_target {
                    if let Some(outer) = ctx.outer_scope {
                        let outer_ty = self.class_self_type(outer);
                        prelude_fields.push(Stmt::ClassAttrDecl(ClassAttrDeclStmt {
                            name: OUTER_NAME.to_owned(),
                            ty: TypeSpec::synthetic(outer_ty),
                            private: true,
                            init: None,
                            loc: s.loc,
                            sym: None,
                        }));
                    }
                    let refs_snapshot: Vec<VarId> = ctx.refs.clone();
                    for v in refs_snapshot {
                        let pname = Self::ref_param_name(ctx, self.program, v);
                        prelude_fields.push(Stmt::ClassAttrDecl(ClassAttrDeclStmt {
                            name: pname,
                            ty: self.ref_type_spec(v),
                            private: true,
                            init: None,
                            loc: s.loc,
                            sym: None,
                        }));
                    }
                }
                prelude_fields.extend(body_stmts);

                let parents = {
                    let class = s.sym.expect("registered");
                    let ty = self.program.syms.class(class).ty;
                    match self.program.types.ty(ty).parent {
                        Some(p) => {
                            let mapped = self.code_gen_itype(p);
                            vec![TypeSpec::synthetic(mapped)]
                        }
                        None => Vec::new(),
                    }
                };
                Ok(Stmt::ClassDecl(crate::ast::ClassDeclStmt {
                    name: if is_target {
                        ctx.lifted_name.clone()
                    } else {
                        s.name.clone()
                    },
                    type_params: Vec::new(),
                    parents,
                    body: StmtList::new(prelude_fields),
                    loc: s.loc,
                    sym: None,
                    type_param_itypes: Vec::new(),
                    instantiation_of: None,
                }))
            }
            Stmt::ClassAttrDecl(s) => Ok(Stmt::ClassAttrDecl(ClassAttrDeclStmt {
                name: s.name.clone(),
                ty: {
                    let resolved = s.ty.resolved.expect("attr type resolved");
                    TypeSpec::synthetic(self.code_gen_itype(resolved))
                },
                private: s.private,
                init: match &s.init {
                    Some(e) => Some(self.clone_expr(e, ctx)?),
                    None => None,
                },
                loc: s.loc,
                sym: None,
            })),
            Stmt::Assign(s) => Ok(Stmt::Assign(crate::ast::AssignStmt {
                lhs: self.clone_expr(&s.lhs, ctx)?,
                rhs: self.clone_expr(&s.rhs, ctx)?,
                loc: s.loc,
                decl: false,
            })),
            Stmt::If(s) => Ok(Stmt::If(crate::ast::IfStmt {
                cond: self.clone_expr(&s.cond, ctx)?,
                then_body: self.clone_list(&s.then_body, ctx)?,
                else_body: self.clone_list(&s.else_body, ctx)?,
                loc: s.loc,
            })),
            Stmt::For(s) => Ok(Stmt::For(crate::ast::ForStmt {
                var: s.var.clone_structural(),
                iter: self.clone_expr(&s.iter, ctx)?,
                body: self.clone_list(&s.body, ctx)?,
                loc: s.loc,
            })),
            Stmt::Return(s) => Ok(Stmt::Return(crate::ast::ReturnStmt {
                value: match &s.value {
                    Some(v) => Some(self.clone_expr(v, ctx)?),
                    None => None,
                },
                loc: s.loc,
            })),
            Stmt::Expr(s) => Ok(Stmt::Expr(ExprStmt {
                expr: self.clone_expr(&s.expr, ctx)?,
                loc: s.loc,
            })),
            Stmt::Import(s) => Ok(Stmt::Import(crate::ast::ImportStmt {
                path: s.path.clone(),
                loc: s.loc,
                module: None,
            })),
        }
    }

    fn clone_list(&mut self, list: &StmtList, ctx: &mut LiftCtx<'_>) -> CompileResult<StmtList> {
        let mut stmts = Vec::with_capacity(list.stmts.len());
        for s in &list.stmts {
            if s.is_type_parameterized() {
                continue;
            }
            stmts.push(self.clone_stmt(s, ctx)?);
        }
        Ok(StmtList::new(stmts))
    }

    fn clone_expr(&mut self, expr: &Expr, ctx: &mut LiftCtx<'_>) -> CompileResult<Expr> {
        match expr {
            Expr::Ident(var) => {
                let loc = var.info.loc;
                match var.info.sym {
                    Some(SymbolRef::Var(v)) if ctx.refs.contains(&v) => {
                        let pname = Self::ref_param_name(ctx, self.program, v);
                        let holder = if ctx.lifting_class {
                            Expr::attr(Expr::SelfExpr(NodeInfo::at(loc)), pname, loc)
                        } else {
                            Expr::ident(pname, loc)
                        };
                        Ok(Expr::attr(holder, "value", loc))
                    }
                    Some(SymbolRef::Var(v))
                        if ctx.lifting_class && self.is_enclosing_member_var(v, ctx) =>
                    {
                        let name = self.program.syms.var(v).name.clone();
                        Ok(self.outer_chain(ctx.class_depth.max(1), &name, loc))
                    }
                    Some(SymbolRef::Func(f))
                        if matches!(ctx.target, LiftKey::Func(t) if t == f) =>
                    {
                        Ok(Expr::ident(ctx.lifted_name.clone(), loc))
                    }
                    Some(SymbolRef::Func(f)) if ctx.lift_map.contains_key(&LiftKey::Func(f)) => {
                        let name = ctx.lift_map[&LiftKey::Func(f)].lifted_name.clone();
                        Ok(Expr::ident(name, loc))
                    }
                    Some(SymbolRef::Class(c))
                        if matches!(ctx.target, LiftKey::Class(t) if t == c) =>
                    {
                        Ok(Expr::ident(ctx.lifted_name.clone(), loc))
                    }
                    Some(SymbolRef::Class(c))
                        if ctx.lift_map.contains_key(&LiftKey::Class(c)) =>
                    {
                        let name = ctx.lift_map[&LiftKey::Class(c)].lifted_name.clone();
                        Ok(Expr::ident(name, loc))
                    }
                    _ => Ok(Expr::ident(var.name.clone(), loc)),
                }
            }
            Expr::Call(e) => {
                let callee_key = callee_lift_key(&e.callee);
                let mut args = Vec::with_capacity(e.args.len() + 2);
                // the entry's extra leading arguments come first
                if let Some(key) = callee_key
                    && let Some(entry) = ctx.lift_map.get(&key)
                {
                    let loc = e.info.loc;
                    if let Some(outer) = entry.outer_scope {
                        args.push(self.outer_arg(outer, ctx.class_depth, loc));
                    }
                    let entry_refs = entry.refs.clone();
                    for v in entry_refs {
                        let pname = Self::ref_param_name(ctx, self.program, v);
                        let holder = if ctx.lifting_class {
                            Expr::attr(Expr::SelfExpr(NodeInfo::at(loc)), pname, loc)
                        } else {
                            Expr::ident(pname, loc)
                        };
                        args.push(holder);
                    }
                }
                let callee = self.clone_expr(&e.callee, ctx)?;
                for a in &e.args {
                    args.push(self.clone_expr(a, ctx)?);
                }
                Ok(Expr::Call(CallExpr {
                    callee: Box::new(callee),
                    type_args: e
                        .type_args
                        .iter()
                        .map(|t| {
                            let resolved = t.resolved.expect("type args resolved");
                            TypeSpec::synthetic(self.code_gen_itype(resolved))
                        })
                        .collect(),
                    args,
                    info: NodeInfo::at(e.info.loc),
                }))
            }
            Expr::SelfExpr(i) => Ok(Expr::SelfExpr(NodeInfo::at(i.loc))),
            Expr::SuperExpr(i) => Ok(Expr::SuperExpr(NodeInfo::at(i.loc))),
            Expr::IntLit(v, i) => Ok(Expr::IntLit(*v, NodeInfo::at(i.loc))),
            Expr::FloatLit(v, i) => Ok(Expr::FloatLit(*v, NodeInfo::at(i.loc))),
            Expr::BoolLit(v, i) => Ok(Expr::BoolLit(*v, NodeInfo::at(i.loc))),
            Expr::StrLit(v, i) => Ok(Expr::StrLit(v.clone(), NodeInfo::at(i.loc))),
            Expr::UnOp(e) => Ok(Expr::UnOp(crate::ast::UnOpExpr {
                op: e.op,
                operand: Box::new(self.clone_expr(&e.operand, ctx)?),
                info: NodeInfo::at(e.info.loc),
            })),
            Expr::BinOp(e) => Ok(Expr::BinOp(crate::ast::BinOpExpr {
                op: e.op,
                lhs: Box::new(self.clone_expr(&e.lhs, ctx)?),
                rhs: Box::new(self.clone_expr(&e.rhs, ctx)?),
                info: NodeInfo::at(e.info.loc),
            })),
            Expr::AttrAccess(e) => Ok(Expr::attr(
                self.clone_expr(&e.primary, ctx)?,
                e.attr.clone(),
                e.info.loc,
            )),
            Expr::ArrayAccess(e) => Ok(Expr::ArrayAccess(crate::ast::ArrayAccessExpr {
                primary: Box::new(self.clone_expr(&e.primary, ctx)?),
                index: Box::new(self.clone_expr(&e.index, ctx)?),
                info: NodeInfo::at(e.info.loc),
            })),
            Expr::ListLit(e) => {
                let mut elems = Vec::with_capacity(e.elems.len());
                for a in &e.elems {
                    elems.push(self.clone_expr(a, ctx)?);
                }
                Ok(Expr::ListLit(crate::ast::ListLitExpr {
                    elems,
                    info: NodeInfo::at(e.info.loc),
                }))
            }
            Expr::MapLit(e) => {
                let mut pairs = Vec::with_capacity(e.pairs.len());
                for (k, v) in &e.pairs {
                    pairs.push((self.clone_expr(k, ctx)?, self.clone_expr(v, ctx)?));
                }
                Ok(Expr::MapLit(crate::ast::MapLitExpr {
                    pairs,
                    info: NodeInfo::at(e.info.loc),
                }))
            }
            Expr::AssignExpr(e) => Ok(Expr::AssignExpr(AssignExprNode {
                lhs: Box::new(self.clone_expr(&e.lhs, ctx)?),
                rhs: Box::new(self.clone_expr(&e.rhs, ctx)?),
                info: NodeInfo::at(e.info.loc),
            })),
            Expr::ExprList(e) => {
                let mut exprs = Vec::with_capacity(e.exprs.len());
                for a in &e.exprs {
                    exprs.push(self.clone_expr(a, ctx)?);
                }
                Ok(Expr::ExprList(ExprListExpr {
                    exprs,
                    info: NodeInfo::at(e.info.loc),
                }))
            }
        }
    }

    fn is_enclosing_member_var(&self, v: VarId, ctx: &LiftCtx<'_>) -> bool {
        let vs = self.program.syms.var(v);
        let Some(owner) = vs.owner_class else {
            return false;
        };
        match ctx.outer_scope {
            Some(outer) => self.program.syms.class(owner).class_scope == outer,
            None => false,
        }
    }

    /// `self.<outer>.<outer>...name` with `hops` outer dereferences.
    fn outer_chain(&self, hops: usize, name: &str, loc: SourceLoc) -> Expr {
        let mut cur = Expr::SelfExpr(NodeInfo::at(loc));
        for _ in 0..hops {
            cur = Expr::attr(cur, OUTER_NAME, loc);
        }
        Expr::attr(cur, name, loc)
    }

    /// The expression passed as the `<outer>` constructor argument.
    fn outer_arg(&self, outer: ScopeId, class_depth: usize, loc: SourceLoc) -> Expr {
        let _ = outer;
        if class_depth == 0 {
            Expr::SelfExpr(NodeInfo::at(loc))
        } else {
            let mut cur = Expr::SelfExpr(NodeInfo::at(loc));
            for _ in 0..class_depth {
                cur = Expr::attr(cur, OUTER_NAME, loc);
            }
            cur
        }
    }

    fn class_self_type(&mut self, class_scope: ScopeId) -> ITypeId {
        let ScopeOwner::Class(class) = self.program.scopes.get(class_scope).owner else {
            panic!("outer scope is not a class scope");
        };
        let followed = self.program.syms.follow_lifted_chain(class);
        let ty = self.program.syms.class(followed).ty;
        let params = self.program.syms.class(followed).type_params.clone();
        self.program.types.instantiate(ty, &params)
    }

    // ------------------------------------------------------------------
    // rewriting the original scope
    // ------------------------------------------------------------------

    /// Promotes captured parameters: the parameter is renamed, and the
    /// function body starts by moving it into a fresh ref cell under the
    /// original name.
    fn promote_captured_params(
        &mut self,
        s: &mut crate::ast::FuncDeclStmt,
        refs: &[VarId],
    ) -> CompileResult<Vec<Stmt>> {
        let body_scope = s.body.scope.expect("func body scope");
        let mut prepends = Vec::new();
        for p in &mut s.params {
            let mut t = crate::analysis::types::TypeTranslator::new();
            let Some(sym) = self.program.scopes.find_var(
                body_scope,
                &p.name,
                crate::analysis::scope::RecurseMode::NoRecurse,
                &mut t,
            ) else {
                continue;
            };
            if !refs.contains(&sym) {
                continue;
            }
            let ty = self.program.syms.var(sym).ty.expect("param typed");
            let renamed = format!("{}$renamed", p.name);
            self.program
                .create_var_symbol(body_scope, &renamed, Some(ty), None, false);
            self.program.syms.var_mut(sym).promote_to_ref = true;

            let loc = p.loc;
            let orig_name = p.name.clone();
            p.name = renamed.clone();

            let ref_ctor = self.ref_ctor_call(ty, loc);
            let exprs = vec![
                Expr::AssignExpr(AssignExprNode {
                    lhs: Box::new(Expr::ident(&*orig_name, loc)),
                    rhs: Box::new(ref_ctor),
                    info: NodeInfo::at(loc),
                }),
                Expr::AssignExpr(AssignExprNode {
                    lhs: Box::new(Expr::attr(Expr::ident(&*orig_name, loc), "value", loc)),
                    rhs: Box::new(Expr::ident(&*renamed, loc)),
                    info: NodeInfo::at(loc),
                }),
            ];
            prepends.push(Stmt::Expr(ExprStmt {
                expr: Expr::ExprList(ExprListExpr {
                    exprs,
                    info: NodeInfo::at(loc),
                }),
                loc,
            }));
        }
        Ok(prepends)
    }

    fn ref_ctor_call(&mut self, elem_ty: ITypeId, loc: SourceLoc) -> Expr {
        let elem = self.code_gen_itype(elem_ty);
        Expr::Call(CallExpr {
            callee: Box::new(Expr::ident("<ref>", loc)),
            type_args: vec![TypeSpec::synthetic(elem)],
            args: Vec::new(),
            info: NodeInfo::at(loc),
        })
    }

    /// Rewrites the original scope after lifting: declaring assignments of
    /// captured variables allocate ref cells, reads go through `.value`,
    /// and calls to lifted entities pass the matching refs.
    fn rewrite_list(
        &mut self,
        list: &mut StmtList,
        map: &LiftMap,
        refs: &[VarId],
    ) -> CompileResult<()> {
        if map.is_empty() && refs.is_empty() {
            return Ok(());
        }
        // promote first so re-checks see ref-typed symbols
        for &v in refs {
            self.program.syms.var_mut(v).promote_to_ref = true;
        }
        self.rewrite_list_inner(list, map, refs)
    }

    fn rewrite_list_inner(
        &mut self,
        list: &mut StmtList,
        map: &LiftMap,
        refs: &[VarId],
    ) -> CompileResult<()> {
        let scope = list.scope.expect("scope set before rewrites");
        for stmt in &mut list.stmts {
            let rewritten = self.rewrite_stmt(stmt, map, refs, scope)?;
            if rewritten {
                let mut an = reanalyzer(self.program, self.module);
                an.type_check_stmt(stmt, scope)?;
            }
        }
        Ok(())
    }

    /// Returns true when the statement's expressions changed and need a
    /// re-check.
    fn rewrite_stmt(
        &mut self,
        stmt: &mut Stmt,
        map: &LiftMap,
        refs: &[VarId],
        scope: ScopeId,
    ) -> CompileResult<bool> {
        match stmt {
            Stmt::ClassDecl(s) => {
                self.rewrite_list_inner(&mut s.body, map, refs)?;
                Ok(false)
            }
            Stmt::FuncDecl(s) => {
                self.rewrite_list_inner(&mut s.body, map, refs)?;
                Ok(false)
            }
            Stmt::ClassAttrDecl(s) => match &mut s.init {
                Some(init) => {
                    let mut changed = false;
                    self.rewrite_expr(init, map, refs, &mut changed);
                    Ok(changed)
                }
                None => Ok(false),
            },
            Stmt::Assign(s) => {
                // a declaring assignment of a captured variable becomes
                // `x = <ref>{T}(); x.value = rhs`
                let decl_target = match (&s.lhs, s.decl) {
                    (Expr::Ident(var), true) => match var.info.sym {
                        Some(SymbolRef::Var(v)) if refs.contains(&v) => Some(v),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(v) = decl_target {
                    let loc = s.loc;
                    let name = self.program.syms.var(v).name.clone();
                    let ty = self.program.syms.var(v).ty.expect("captured symbol typed");
                    let mut rhs = take_expr(&mut s.rhs);
                    let mut changed = false;
                    self.rewrite_expr(&mut rhs, map, refs, &mut changed);
                    let ref_ctor = self.ref_ctor_call(ty, loc);
                    let exprs = vec![
                        Expr::AssignExpr(AssignExprNode {
                            lhs: Box::new(Expr::ident(&*name, loc)),
                            rhs: Box::new(ref_ctor),
                            info: NodeInfo::at(loc),
                        }),
                        Expr::AssignExpr(AssignExprNode {
                            lhs: Box::new(Expr::attr(Expr::ident(&*name, loc), "value", loc)),
                            rhs: Box::new(rhs),
                            info: NodeInfo::at(loc),
                        }),
                    ];
                    *stmt = Stmt::Expr(ExprStmt {
                        expr: Expr::ExprList(ExprListExpr {
                            exprs,
                            info: NodeInfo::at(loc),
                        }),
                        loc,
                    });
                    return Ok(true);
                }
                let mut changed = false;
                self.rewrite_expr(&mut s.lhs, map, refs, &mut changed);
                self.rewrite_expr(&mut s.rhs, map, refs, &mut changed);
                Ok(changed)
            }
            Stmt::If(s) => {
                let mut changed = false;
                self.rewrite_expr(&mut s.cond, map, refs, &mut changed);
                if changed {
                    let mut an = reanalyzer(self.program, self.module);
                    an.type_check_expr(&mut s.cond, scope, None)?;
                }
                self.rewrite_list_inner(&mut s.then_body, map, refs)?;
                self.rewrite_list_inner(&mut s.else_body, map, refs)?;
                Ok(false)
            }
            Stmt::For(s) => {
                let mut changed = false;
                self.rewrite_expr(&mut s.iter, map, refs, &mut changed);
                if changed {
                    let body_scope = s.body.scope.expect("for body scope");
                    let mut an = reanalyzer(self.program, self.module);
                    an.type_check_expr(&mut s.iter, body_scope, None)?;
                }
                self.rewrite_list_inner(&mut s.body, map, refs)?;
                Ok(false)
            }
            Stmt::Return(s) => match &mut s.value {
                Some(v) => {
                    let mut changed = false;
                    self.rewrite_expr(v, map, refs, &mut changed);
                    Ok(changed)
                }
                None => Ok(false),
            },
            Stmt::Expr(s) => {
                let mut changed = false;
                self.rewrite_expr(&mut s.expr, map, refs, &mut changed);
                Ok(changed)
            }
            Stmt::Import(_) => Ok(false),
        }
    }

    fn rewrite_expr(&mut self, expr: &mut Expr, map: &LiftMap, refs: &[VarId], changed: &mut bool) {
        // children first; appended ref arguments are added afterwards so
        // they are not themselves rewritten
        match expr {
            Expr::UnOp(e) => self.rewrite_expr(&mut e.operand, map, refs, changed),
            Expr::BinOp(e) => {
                self.rewrite_expr(&mut e.lhs, map, refs, changed);
                self.rewrite_expr(&mut e.rhs, map, refs, changed);
            }
            Expr::AttrAccess(e) => self.rewrite_expr(&mut e.primary, map, refs, changed),
            Expr::ArrayAccess(e) => {
                self.rewrite_expr(&mut e.primary, map, refs, changed);
                self.rewrite_expr(&mut e.index, map, refs, changed);
            }
            Expr::Call(e) => {
                let callee_key = callee_lift_key(&e.callee);
                self.rewrite_expr(&mut e.callee, map, refs, changed);
                for a in &mut e.args {
                    self.rewrite_expr(a, map, refs, changed);
                }
                if let Some(key) = callee_key
                    && let Some(entry) = map.get(&key)
                {
                    let loc = e.info.loc;
                    // rename the callee and thread the lifted state through
                    if let Expr::Ident(id) = e.callee.as_mut() {
                        id.name = entry.lifted_name.clone();
                        id.info = NodeInfo::at(loc);
                    }
                    let mut extra = Vec::new();
                    if entry.outer_scope.is_some() {
                        extra.push(Expr::SelfExpr(NodeInfo::at(loc)));
                    }
                    for &v in &entry.refs {
                        let name = self.program.syms.var(v).name.clone();
                        extra.push(Expr::ident(name, loc));
                    }
                    for (k, arg) in extra.into_iter().enumerate() {
                        e.args.insert(k, arg);
                    }
                    *changed = true;
                }
            }
            Expr::ListLit(e) => {
                for a in &mut e.elems {
                    self.rewrite_expr(a, map, refs, changed);
                }
            }
            Expr::MapLit(e) => {
                for (k, v) in &mut e.pairs {
                    self.rewrite_expr(k, map, refs, changed);
                    self.rewrite_expr(v, map, refs, changed);
                }
            }
            Expr::AssignExpr(e) => {
                self.rewrite_expr(&mut e.lhs, map, refs, changed);
                self.rewrite_expr(&mut e.rhs, map, refs, changed);
            }
            Expr::ExprList(e) => {
                for a in &mut e.exprs {
                    self.rewrite_expr(a, map, refs, changed);
                }
            }
            _ => {}
        }

        let is_promoted_read = match expr {
            Expr::Ident(var) => match var.info.sym {
                Some(SymbolRef::Var(v)) => refs.contains(&v),
                _ => false,
            },
            _ => false,
        };
        if is_promoted_read {
            let loc = expr.info().loc;
            let inner = take_expr(expr);
            let Expr::Ident(var) = inner else { unreachable!() };
            *expr = Expr::attr(Expr::ident(var.name, loc), "value", loc);
            *changed = true;
        }
    }
}

fn callee_lift_key(callee: &Expr) -> Option<LiftKey> {
    match callee {
        Expr::Ident(var) => match var.info.sym {
            Some(SymbolRef::Func(f)) => Some(LiftKey::Func(f)),
            Some(SymbolRef::Class(c)) => Some(LiftKey::Class(c)),
            _ => None,
        },
        _ => None,
    }
}

fn assign_stmt(lhs: Expr, rhs: Expr, loc: SourceLoc) -> Stmt {
    Stmt::Assign(crate::ast::AssignStmt {
        lhs,
        rhs,
        loc,
        decl: false,
    })
}
