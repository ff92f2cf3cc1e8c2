//! The abstract syntax tree.
//!
//! One tagged enum per node category (statements, expressions), each variant
//! owning its subtree. Expressions carry a [`NodeInfo`] side record holding
//! the semantic state filled in by the analyzer: static type, expected type,
//! resolved symbol, and resolved type arguments.
//!
//! Three cloning disciplines are supported:
//!
//! - [`Stmt::clone_structural`]: copies the tree with no semantic state, for
//!   duplicating a checked template into a context that will be re-checked;
//! - [`Stmt::clone_semantic`]: copies resolved symbols and types along with
//!   the tree, for clones inserted into the same scope;
//! - [`Stmt::clone_for_template`]: structural clone that substitutes every
//!   type-parameter occurrence through a translator, producing a
//!   monomorphized copy.
//!
//! The fourth discipline, clone-for-lift, is driven by a lift context and
//! lives with the lifting pass.

use bitflags::bitflags;

use crate::{
    analysis::{
        scope::ScopeId,
        symbol::{ClassId, FuncId, ModuleId, VarId},
        types::{ITypeId, TypeArena, TypeTranslator},
    },
    error::SourceLoc,
};

bitflags! {
    /// Where a node sits relative to its enclosing constructs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LocCtx: u8 {
        const FUNCTION_CALL        = 1 << 0;
        const TOP_LEVEL_CLASS_BODY = 1 << 1;
        const TOP_LEVEL_FUNC_BODY  = 1 << 2;
        const ASSIGNMENT_LHS       = 1 << 3;
        const FUNCTION_PARAM       = 1 << 4;
    }
}

/// A resolved symbol reference stored on an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef {
    Var(VarId),
    Func(FuncId),
    Class(ClassId),
    Module(ModuleId),
}

/// Semantic side state of an expression node.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub loc: SourceLoc,
    pub ctx: LocCtx,
    pub static_ty: Option<ITypeId>,
    pub expected_ty: Option<ITypeId>,
    pub sym: Option<SymbolRef>,
    /// Resolved type arguments (calls with explicit `{T,...}`).
    pub type_args: Vec<ITypeId>,
}

impl NodeInfo {
    #[must_use]
    pub fn at(loc: SourceLoc) -> Self {
        Self {
            loc,
            ..Self::default()
        }
    }

    /// A structural copy: location survives, semantic state does not.
    #[must_use]
    fn structural(&self) -> Self {
        Self {
            loc: self.loc,
            ..Self::default()
        }
    }

    #[must_use]
    fn for_template(&self, arena: &mut TypeArena, t: &TypeTranslator) -> Self {
        Self {
            loc: self.loc,
            ctx: LocCtx::default(),
            static_ty: None,
            expected_ty: None,
            sym: None,
            type_args: self
                .type_args
                .iter()
                .map(|&it| t.translate(arena, it))
                .collect(),
        }
    }
}

/// A source-level or synthetic type annotation.
///
/// The parser fills `path`/`args`; the analyzer caches the resolution in
/// `resolved`. Synthetic annotations produced by the rewrite passes carry
/// only `resolved` and an empty path.
#[derive(Debug, Clone, Default)]
pub struct TypeSpec {
    pub path: Vec<String>,
    pub args: Vec<TypeSpec>,
    pub loc: SourceLoc,
    pub resolved: Option<ITypeId>,
}

impl TypeSpec {
    #[must_use]
    pub fn named(name: impl Into<String>, loc: SourceLoc) -> Self {
        Self {
            path: vec![name.into()],
            args: Vec::new(),
            loc,
            resolved: None,
        }
    }

    #[must_use]
    pub fn synthetic(resolved: ITypeId) -> Self {
        Self {
            path: Vec::new(),
            args: Vec::new(),
            loc: SourceLoc::default(),
            resolved: Some(resolved),
        }
    }

    #[must_use]
    fn clone_structural(&self) -> Self {
        Self {
            path: self.path.clone(),
            args: self.args.iter().map(TypeSpec::clone_structural).collect(),
            loc: self.loc,
            // synthetic specs have nothing to re-resolve from; keep them
            resolved: if self.path.is_empty() { self.resolved } else { None },
        }
    }

    #[must_use]
    fn clone_for_template(&self, arena: &mut TypeArena, t: &TypeTranslator) -> Self {
        let resolved = self
            .resolved
            .expect("template clone requires resolved type annotations");
        Self::synthetic(t.translate(arena, resolved))
    }
}

/// A sequence of statements owning a scope once the analyzer has run.
///
/// Module roots, class bodies, function bodies, for-loop bodies, and if
/// branches are all statement lists; those are exactly the scope-opening
/// node positions.
#[derive(Debug, Default)]
pub struct StmtList {
    pub scope: Option<ScopeId>,
    pub stmts: Vec<Stmt>,
}

impl StmtList {
    #[must_use]
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { scope: None, stmts }
    }

    #[must_use]
    pub fn clone_structural(&self) -> Self {
        Self {
            scope: None,
            stmts: self.stmts.iter().map(Stmt::clone_structural).collect(),
        }
    }

    #[must_use]
    pub fn clone_semantic(&self) -> Self {
        Self {
            scope: self.scope,
            stmts: self.stmts.iter().map(Stmt::clone_semantic).collect(),
        }
    }

    #[must_use]
    pub fn clone_for_template(&self, arena: &mut TypeArena, t: &TypeTranslator) -> Self {
        Self {
            scope: None,
            stmts: self
                .stmts
                .iter()
                .map(|s| s.clone_for_template(arena, t))
                .collect(),
        }
    }
}

#[derive(Debug)]
pub enum Stmt {
    ClassDecl(ClassDeclStmt),
    FuncDecl(FuncDeclStmt),
    ClassAttrDecl(ClassAttrDeclStmt),
    Assign(AssignStmt),
    If(IfStmt),
    For(ForStmt),
    Return(ReturnStmt),
    Expr(ExprStmt),
    Import(ImportStmt),
}

#[derive(Debug)]
pub struct ClassDeclStmt {
    pub name: String,
    pub type_params: Vec<String>,
    pub parents: Vec<TypeSpec>,
    pub body: StmtList,
    pub loc: SourceLoc,
    pub sym: Option<ClassId>,
    /// Filled on registration: the placeholder types for `type_params`.
    pub type_param_itypes: Vec<ITypeId>,
    /// For monomorphized clones: the fully-instantiated type realized.
    pub instantiation_of: Option<ITypeId>,
}

#[derive(Debug)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeSpec,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct FuncDeclStmt {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<ParamDecl>,
    /// `None` means void.
    pub ret: Option<TypeSpec>,
    pub body: StmtList,
    pub is_ctor: bool,
    pub loc: SourceLoc,
    pub sym: Option<FuncId>,
    pub type_param_itypes: Vec<ITypeId>,
    /// For monomorphized clones: the type-argument tuple realized.
    pub instantiation_args: Vec<ITypeId>,
}

#[derive(Debug)]
pub struct ClassAttrDeclStmt {
    pub name: String,
    pub ty: TypeSpec,
    pub private: bool,
    pub init: Option<Expr>,
    pub loc: SourceLoc,
    pub sym: Option<VarId>,
}

#[derive(Debug)]
pub struct AssignStmt {
    pub lhs: Expr,
    pub rhs: Expr,
    pub loc: SourceLoc,
    /// True when this assignment introduced the variable it writes.
    pub decl: bool,
}

#[derive(Debug)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_body: StmtList,
    pub else_body: StmtList,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct ForStmt {
    /// Always an [`Expr::Ident`]; the loop variable declares into the body
    /// scope.
    pub var: Expr,
    pub iter: Expr,
    pub body: StmtList,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct ExprStmt {
    pub expr: Expr,
    pub loc: SourceLoc,
}

#[derive(Debug)]
pub struct ImportStmt {
    pub path: Vec<String>,
    pub loc: SourceLoc,
    pub module: Option<ModuleId>,
}

impl Stmt {
    #[must_use]
    pub fn clone_structural(&self) -> Self {
        match self {
            Self::ClassDecl(s) => Self::ClassDecl(ClassDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                parents: s.parents.iter().map(TypeSpec::clone_structural).collect(),
                body: s.body.clone_structural(),
                loc: s.loc,
                sym: None,
                type_param_itypes: Vec::new(),
                instantiation_of: s.instantiation_of,
            }),
            Self::FuncDecl(s) => Self::FuncDecl(FuncDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                params: s
                    .params
                    .iter()
                    .map(|p| ParamDecl {
                        name: p.name.clone(),
                        ty: p.ty.clone_structural(),
                        loc: p.loc,
                    })
                    .collect(),
                ret: s.ret.as_ref().map(TypeSpec::clone_structural),
                body: s.body.clone_structural(),
                is_ctor: s.is_ctor,
                loc: s.loc,
                sym: None,
                type_param_itypes: Vec::new(),
                instantiation_args: s.instantiation_args.clone(),
            }),
            Self::ClassAttrDecl(s) => Self::ClassAttrDecl(ClassAttrDeclStmt {
                name: s.name.clone(),
                ty: s.ty.clone_structural(),
                private: s.private,
                init: s.init.as_ref().map(Expr::clone_structural),
                loc: s.loc,
                sym: None,
            }),
            Self::Assign(s) => Self::Assign(AssignStmt {
                lhs: s.lhs.clone_structural(),
                rhs: s.rhs.clone_structural(),
                loc: s.loc,
                decl: false,
            }),
            Self::If(s) => Self::If(IfStmt {
                cond: s.cond.clone_structural(),
                then_body: s.then_body.clone_structural(),
                else_body: s.else_body.clone_structural(),
                loc: s.loc,
            }),
            Self::For(s) => Self::For(ForStmt {
                var: s.var.clone_structural(),
                iter: s.iter.clone_structural(),
                body: s.body.clone_structural(),
                loc: s.loc,
            }),
            Self::Return(s) => Self::Return(ReturnStmt {
                value: s.value.as_ref().map(Expr::clone_structural),
                loc: s.loc,
            }),
            Self::Expr(s) => Self::Expr(ExprStmt {
                expr: s.expr.clone_structural(),
                loc: s.loc,
            }),
            Self::Import(s) => Self::Import(ImportStmt {
                path: s.path.clone(),
                loc: s.loc,
                module: None,
            }),
        }
    }

    #[must_use]
    pub fn clone_semantic(&self) -> Self {
        match self {
            Self::ClassDecl(s) => Self::ClassDecl(ClassDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                parents: s.parents.clone(),
                body: s.body.clone_semantic(),
                loc: s.loc,
                sym: s.sym,
                type_param_itypes: s.type_param_itypes.clone(),
                instantiation_of: s.instantiation_of,
            }),
            Self::FuncDecl(s) => Self::FuncDecl(FuncDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                params: s
                    .params
                    .iter()
                    .map(|p| ParamDecl {
                        name: p.name.clone(),
                        ty: p.ty.clone(),
                        loc: p.loc,
                    })
                    .collect(),
                ret: s.ret.clone(),
                body: s.body.clone_semantic(),
                is_ctor: s.is_ctor,
                loc: s.loc,
                sym: s.sym,
                type_param_itypes: s.type_param_itypes.clone(),
                instantiation_args: s.instantiation_args.clone(),
            }),
            Self::ClassAttrDecl(s) => Self::ClassAttrDecl(ClassAttrDeclStmt {
                name: s.name.clone(),
                ty: s.ty.clone(),
                private: s.private,
                init: s.init.as_ref().map(Expr::clone_semantic),
                loc: s.loc,
                sym: s.sym,
            }),
            Self::Assign(s) => Self::Assign(AssignStmt {
                lhs: s.lhs.clone_semantic(),
                rhs: s.rhs.clone_semantic(),
                loc: s.loc,
                decl: s.decl,
            }),
            Self::If(s) => Self::If(IfStmt {
                cond: s.cond.clone_semantic(),
                then_body: s.then_body.clone_semantic(),
                else_body: s.else_body.clone_semantic(),
                loc: s.loc,
            }),
            Self::For(s) => Self::For(ForStmt {
                var: s.var.clone_semantic(),
                iter: s.iter.clone_semantic(),
                body: s.body.clone_semantic(),
                loc: s.loc,
            }),
            Self::Return(s) => Self::Return(ReturnStmt {
                value: s.value.as_ref().map(Expr::clone_semantic),
                loc: s.loc,
            }),
            Self::Expr(s) => Self::Expr(ExprStmt {
                expr: s.expr.clone_semantic(),
                loc: s.loc,
            }),
            Self::Import(s) => Self::Import(ImportStmt {
                path: s.path.clone(),
                loc: s.loc,
                module: s.module,
            }),
        }
    }

    #[must_use]
    pub fn clone_for_template(&self, arena: &mut TypeArena, t: &TypeTranslator) -> Self {
        match self {
            Self::ClassDecl(s) => Self::ClassDecl(ClassDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                parents: s
                    .parents
                    .iter()
                    .map(|p| p.clone_for_template(arena, t))
                    .collect(),
                body: s.body.clone_for_template(arena, t),
                loc: s.loc,
                sym: None,
                type_param_itypes: Vec::new(),
                instantiation_of: s.instantiation_of,
            }),
            Self::FuncDecl(s) => Self::FuncDecl(FuncDeclStmt {
                name: s.name.clone(),
                type_params: s.type_params.clone(),
                params: s
                    .params
                    .iter()
                    .map(|p| ParamDecl {
                        name: p.name.clone(),
                        ty: p.ty.clone_for_template(arena, t),
                        loc: p.loc,
                    })
                    .collect(),
                ret: s.ret.as_ref().map(|r| r.clone_for_template(arena, t)),
                body: s.body.clone_for_template(arena, t),
                is_ctor: s.is_ctor,
                loc: s.loc,
                sym: None,
                type_param_itypes: Vec::new(),
                instantiation_args: s.instantiation_args.clone(),
            }),
            Self::ClassAttrDecl(s) => Self::ClassAttrDecl(ClassAttrDeclStmt {
                name: s.name.clone(),
                ty: s.ty.clone_for_template(arena, t),
                private: s.private,
                init: s.init.as_ref().map(|e| e.clone_for_template(arena, t)),
                loc: s.loc,
                sym: None,
            }),
            Self::Assign(s) => Self::Assign(AssignStmt {
                lhs: s.lhs.clone_for_template(arena, t),
                rhs: s.rhs.clone_for_template(arena, t),
                loc: s.loc,
                decl: false,
            }),
            Self::If(s) => Self::If(IfStmt {
                cond: s.cond.clone_for_template(arena, t),
                then_body: s.then_body.clone_for_template(arena, t),
                else_body: s.else_body.clone_for_template(arena, t),
                loc: s.loc,
            }),
            Self::For(s) => Self::For(ForStmt {
                var: s.var.clone_for_template(arena, t),
                iter: s.iter.clone_for_template(arena, t),
                body: s.body.clone_for_template(arena, t),
                loc: s.loc,
            }),
            Self::Return(s) => Self::Return(ReturnStmt {
                value: s.value.as_ref().map(|e| e.clone_for_template(arena, t)),
                loc: s.loc,
            }),
            Self::Expr(s) => Self::Expr(ExprStmt {
                expr: s.expr.clone_for_template(arena, t),
                loc: s.loc,
            }),
            Self::Import(s) => Self::Import(ImportStmt {
                path: s.path.clone(),
                loc: s.loc,
                module: None,
            }),
        }
    }

    /// True for parameterized (not yet monomorphized) declarations, which
    /// the lifting pass and the code generator skip.
    #[must_use]
    pub fn is_type_parameterized(&self) -> bool {
        match self {
            Self::ClassDecl(s) => !s.type_params.is_empty(),
            Self::FuncDecl(s) => !s.type_params.is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn loc(&self) -> SourceLoc {
        match self {
            Self::ClassDecl(s) => s.loc,
            Self::FuncDecl(s) => s.loc,
            Self::ClassAttrDecl(s) => s.loc,
            Self::Assign(s) => s.loc,
            Self::If(s) => s.loc,
            Self::For(s) => s.loc,
            Self::Return(s) => s.loc,
            Self::Expr(s) => s.loc,
            Self::Import(s) => s.loc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpKind {
    Plus,
    Minus,
    CmpNot,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    CmpAnd,
    CmpOr,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    CmpEq,
    CmpNeq,
    BitAnd,
    BitOr,
    BitXor,
    BitLshift,
    BitRshift,
}

impl BinOpKind {
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::CmpLt | Self::CmpLe | Self::CmpGt | Self::CmpGe | Self::CmpEq | Self::CmpNeq
        )
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, Self::CmpAnd | Self::CmpOr)
    }

    #[must_use]
    pub fn is_bit(self) -> bool {
        matches!(
            self,
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::BitLshift | Self::BitRshift
        )
    }

    #[must_use]
    pub fn is_arith(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mult | Self::Div | Self::Mod)
    }
}

#[derive(Debug)]
pub enum Expr {
    IntLit(i64, NodeInfo),
    FloatLit(f64, NodeInfo),
    BoolLit(bool, NodeInfo),
    StrLit(String, NodeInfo),
    Ident(IdentExpr),
    SelfExpr(NodeInfo),
    SuperExpr(NodeInfo),
    UnOp(UnOpExpr),
    BinOp(BinOpExpr),
    AttrAccess(AttrAccessExpr),
    ArrayAccess(ArrayAccessExpr),
    Call(CallExpr),
    ListLit(ListLitExpr),
    MapLit(MapLitExpr),
    /// Assignment in expression position; produced by desugaring.
    AssignExpr(AssignExprNode),
    /// Sequence whose value is the last expression; produced by desugaring.
    ExprList(ExprListExpr),
}

#[derive(Debug)]
pub struct IdentExpr {
    pub name: String,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct UnOpExpr {
    pub op: UnOpKind,
    pub operand: Box<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct BinOpExpr {
    pub op: BinOpKind,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct AttrAccessExpr {
    pub primary: Box<Expr>,
    pub attr: String,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct ArrayAccessExpr {
    pub primary: Box<Expr>,
    pub index: Box<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub type_args: Vec<TypeSpec>,
    pub args: Vec<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct ListLitExpr {
    pub elems: Vec<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct MapLitExpr {
    pub pairs: Vec<(Expr, Expr)>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct AssignExprNode {
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub info: NodeInfo,
}

#[derive(Debug)]
pub struct ExprListExpr {
    pub exprs: Vec<Expr>,
    pub info: NodeInfo,
}

impl Expr {
    #[must_use]
    pub fn ident(name: impl Into<String>, loc: SourceLoc) -> Self {
        Self::Ident(IdentExpr {
            name: name.into(),
            info: NodeInfo::at(loc),
        })
    }

    #[must_use]
    pub fn attr(primary: Expr, attr: impl Into<String>, loc: SourceLoc) -> Self {
        Self::AttrAccess(AttrAccessExpr {
            primary: Box::new(primary),
            attr: attr.into(),
            info: NodeInfo::at(loc),
        })
    }

    #[must_use]
    pub fn call(callee: Expr, args: Vec<Expr>, loc: SourceLoc) -> Self {
        Self::Call(CallExpr {
            callee: Box::new(callee),
            type_args: Vec::new(),
            args,
            info: NodeInfo::at(loc),
        })
    }

    #[must_use]
    pub fn info(&self) -> &NodeInfo {
        match self {
            Self::IntLit(_, i)
            | Self::FloatLit(_, i)
            | Self::BoolLit(_, i)
            | Self::StrLit(_, i)
            | Self::SelfExpr(i)
            | Self::SuperExpr(i) => i,
            Self::Ident(e) => &e.info,
            Self::UnOp(e) => &e.info,
            Self::BinOp(e) => &e.info,
            Self::AttrAccess(e) => &e.info,
            Self::ArrayAccess(e) => &e.info,
            Self::Call(e) => &e.info,
            Self::ListLit(e) => &e.info,
            Self::MapLit(e) => &e.info,
            Self::AssignExpr(e) => &e.info,
            Self::ExprList(e) => &e.info,
        }
    }

    #[must_use]
    pub fn info_mut(&mut self) -> &mut NodeInfo {
        match self {
            Self::IntLit(_, i)
            | Self::FloatLit(_, i)
            | Self::BoolLit(_, i)
            | Self::StrLit(_, i)
            | Self::SelfExpr(i)
            | Self::SuperExpr(i) => i,
            Self::Ident(e) => &mut e.info,
            Self::UnOp(e) => &mut e.info,
            Self::BinOp(e) => &mut e.info,
            Self::AttrAccess(e) => &mut e.info,
            Self::ArrayAccess(e) => &mut e.info,
            Self::Call(e) => &mut e.info,
            Self::ListLit(e) => &mut e.info,
            Self::MapLit(e) => &mut e.info,
            Self::AssignExpr(e) => &mut e.info,
            Self::ExprList(e) => &mut e.info,
        }
    }

    #[must_use]
    pub fn static_ty(&self) -> Option<ITypeId> {
        self.info().static_ty
    }

    #[must_use]
    pub fn loc(&self) -> SourceLoc {
        self.info().loc
    }

    #[must_use]
    pub fn clone_structural(&self) -> Self {
        self.clone_with(&mut |info| info.structural(), &mut TypeSpec::clone_structural)
    }

    #[must_use]
    pub fn clone_semantic(&self) -> Self {
        self.clone_with(&mut NodeInfo::clone, &mut TypeSpec::clone)
    }

    #[must_use]
    pub fn clone_for_template(&self, arena: &mut TypeArena, t: &TypeTranslator) -> Self {
        // split borrows per closure call; the arena is threaded through both
        let arena = std::cell::RefCell::new(arena);
        self.clone_with(
            &mut |info| info.for_template(&mut **arena.borrow_mut(), t),
            &mut |spec| spec.clone_for_template(&mut **arena.borrow_mut(), t),
        )
    }

    fn clone_with(
        &self,
        info_f: &mut dyn FnMut(&NodeInfo) -> NodeInfo,
        spec_f: &mut dyn FnMut(&TypeSpec) -> TypeSpec,
    ) -> Self {
        match self {
            Self::IntLit(v, i) => Self::IntLit(*v, info_f(i)),
            Self::FloatLit(v, i) => Self::FloatLit(*v, info_f(i)),
            Self::BoolLit(v, i) => Self::BoolLit(*v, info_f(i)),
            Self::StrLit(v, i) => Self::StrLit(v.clone(), info_f(i)),
            Self::SelfExpr(i) => Self::SelfExpr(info_f(i)),
            Self::SuperExpr(i) => Self::SuperExpr(info_f(i)),
            Self::Ident(e) => Self::Ident(IdentExpr {
                name: e.name.clone(),
                info: info_f(&e.info),
            }),
            Self::UnOp(e) => Self::UnOp(UnOpExpr {
                op: e.op,
                operand: Box::new(e.operand.clone_with(info_f, spec_f)),
                info: info_f(&e.info),
            }),
            Self::BinOp(e) => Self::BinOp(BinOpExpr {
                op: e.op,
                lhs: Box::new(e.lhs.clone_with(info_f, spec_f)),
                rhs: Box::new(e.rhs.clone_with(info_f, spec_f)),
                info: info_f(&e.info),
            }),
            Self::AttrAccess(e) => Self::AttrAccess(AttrAccessExpr {
                primary: Box::new(e.primary.clone_with(info_f, spec_f)),
                attr: e.attr.clone(),
                info: info_f(&e.info),
            }),
            Self::ArrayAccess(e) => Self::ArrayAccess(ArrayAccessExpr {
                primary: Box::new(e.primary.clone_with(info_f, spec_f)),
                index: Box::new(e.index.clone_with(info_f, spec_f)),
                info: info_f(&e.info),
            }),
            Self::Call(e) => Self::Call(CallExpr {
                callee: Box::new(e.callee.clone_with(info_f, spec_f)),
                type_args: e.type_args.iter().map(&mut *spec_f).collect(),
                args: e
                    .args
                    .iter()
                    .map(|a| a.clone_with(info_f, spec_f))
                    .collect(),
                info: info_f(&e.info),
            }),
            Self::ListLit(e) => Self::ListLit(ListLitExpr {
                elems: e
                    .elems
                    .iter()
                    .map(|a| a.clone_with(info_f, spec_f))
                    .collect(),
                info: info_f(&e.info),
            }),
            Self::MapLit(e) => Self::MapLit(MapLitExpr {
                pairs: e
                    .pairs
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone_with(info_f, spec_f),
                            v.clone_with(info_f, spec_f),
                        )
                    })
                    .collect(),
                info: info_f(&e.info),
            }),
            Self::AssignExpr(e) => Self::AssignExpr(AssignExprNode {
                lhs: Box::new(e.lhs.clone_with(info_f, spec_f)),
                rhs: Box::new(e.rhs.clone_with(info_f, spec_f)),
                info: info_f(&e.info),
            }),
            Self::ExprList(e) => Self::ExprList(ExprListExpr {
                exprs: e
                    .exprs
                    .iter()
                    .map(|a| a.clone_with(info_f, spec_f))
                    .collect(),
                info: info_f(&e.info),
            }),
        }
    }
}
