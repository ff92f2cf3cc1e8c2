//! The symbolic code generator.
//!
//! One generator per module. It interns five pools (constants, local
//! classes + class references, local functions + function references, and
//! per-function local variables with a reusable temporary pool) and emits
//! one symbolic instruction per operation. `create_object_code` closes the
//! pools over their dependencies and produces the linkable object.

use indexmap::IndexMap;

use crate::{
    analysis::{
        context::Program,
        scope::{RecurseMode, ScopeId},
        symbol::{BoundFunction, ClassId, FuncId, VarId},
        types::{ITypeId, TypeTranslator},
    },
    ast::{
        AssignExprNode, BinOpKind, Expr, Stmt, StmtList, SymbolRef, UnOpKind,
    },
    bytecode::{
        ClassSignature, Constant, FunctionSignature, Label, ObjectCode, SymbolicInstruction,
        SymbolReference, op::Opcode, symbolic::SlotDesc,
    },
    error::{CompileError, CompileResult},
    runtime::CellKind,
};

/// Key for the per-function local-variable pool: a program symbol or a
/// reusable scratch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LocalKey {
    Sym(VarId),
    Temp(u32),
}

pub struct CodeGenerator<'p> {
    program: &'p mut Program,
    module: String,
    module_scope: ScopeId,

    instructions: Vec<SymbolicInstruction>,
    labels: Vec<Label>,

    constant_pool: IndexMap<Constant, u32>,
    /// Local class pool (classes this module materializes).
    class_pool: Vec<ClassId>,
    /// Class reference table, keyed by symbol for interning.
    class_refs: IndexMap<ClassId, SymbolReference>,
    /// Local function pool plus each function's start label.
    func_pool: Vec<(FuncId, u32)>,
    func_refs: IndexMap<FuncId, SymbolReference>,

    locals: IndexMap<LocalKey, u32>,
    temp_counter: u32,
    free_temps: Vec<u32>,

    name_offsets: Vec<(String, u32)>,
}

impl<'p> CodeGenerator<'p> {
    pub fn new(program: &'p mut Program, module: &str) -> Self {
        let module_scope = program.modules[module].root_scope;
        Self {
            program,
            module: module.to_owned(),
            module_scope,
            instructions: Vec::new(),
            labels: Vec::new(),
            constant_pool: IndexMap::new(),
            class_pool: Vec::new(),
            class_refs: IndexMap::new(),
            func_pool: Vec::new(),
            func_refs: IndexMap::new(),
            locals: IndexMap::new(),
            temp_counter: 0,
            free_temps: Vec::new(),
            name_offsets: Vec::new(),
        }
    }

    /// Generates the whole module and produces its object code.
    pub fn generate(mut self, ast: &StmtList) -> CompileResult<ObjectCode> {
        // the module singleton class is always materialized locally
        let module_class = self.program.modules[&self.module].module_class;
        let module_ty = self.program.syms.class(module_class).ty;
        let module_it = self.program.types.instantiate0(module_ty);
        self.enter_class(module_it)?;

        for stmt in &ast.stmts {
            self.gen_stmt(stmt)?;
        }
        self.create_object_code()
    }

    // ------------------------------------------------------------------
    // pools and emission
    // ------------------------------------------------------------------

    fn emit(&mut self, op: Opcode) {
        self.instructions.push(SymbolicInstruction::Plain(op));
    }

    fn emit_u32(&mut self, op: Opcode, n: u32) {
        self.instructions.push(SymbolicInstruction::U32(op, n));
    }

    fn emit_branch(&mut self, op: Opcode, label: u32) {
        self.instructions.push(SymbolicInstruction::Branch(op, label));
    }

    fn emit_int(&mut self, op: Opcode, v: i64) {
        self.instructions.push(SymbolicInstruction::Int(op, v));
    }

    fn emit_float(&mut self, op: Opcode, v: f64) {
        self.instructions.push(SymbolicInstruction::Float(op, v));
    }

    fn emit_bool(&mut self, op: Opcode, v: bool) {
        self.instructions.push(SymbolicInstruction::Bool(op, v));
    }

    fn new_label(&mut self) -> u32 {
        let idx = u32::try_from(self.labels.len()).expect("label count fits u32");
        self.labels.push(Label::unbound());
        idx
    }

    fn bind_label(&mut self, label: u32) {
        let pos = u32::try_from(self.instructions.len()).expect("stream fits u32");
        let l = &mut self.labels[label as usize];
        assert!(l.index.is_none(), "label bound twice");
        l.index = Some(pos);
    }

    fn current_offset(&self) -> u32 {
        u32::try_from(self.instructions.len()).expect("stream fits u32")
    }

    fn create_constant(&mut self, konst: Constant) -> u32 {
        let next = u32::try_from(self.constant_pool.len()).expect("pool fits u32");
        *self.constant_pool.entry(konst).or_insert(next)
    }

    fn reset_locals(&mut self) {
        self.locals.clear();
        self.temp_counter = 0;
        self.free_temps.clear();
    }

    fn create_local(&mut self, key: LocalKey) -> (u32, bool) {
        let next = u32::try_from(self.locals.len()).expect("locals fit u32");
        match self.locals.entry(key) {
            indexmap::map::Entry::Occupied(e) => (*e.get(), false),
            indexmap::map::Entry::Vacant(e) => {
                e.insert(next);
                (next, true)
            }
        }
    }

    fn create_temp(&mut self) -> LocalKey {
        match self.free_temps.pop() {
            Some(t) => LocalKey::Temp(t),
            None => {
                let t = self.temp_counter;
                self.temp_counter += 1;
                LocalKey::Temp(t)
            }
        }
    }

    fn return_temp(&mut self, key: LocalKey) {
        let LocalKey::Temp(t) = key else {
            panic!("returned a non-temporary to the temp pool");
        };
        debug_assert!(!self.free_temps.contains(&t));
        self.free_temps.push(t);
    }

    /// A symbol is local when it lives inside this module's scope tree.
    fn is_local_scope(&self, scope: ScopeId) -> bool {
        self.program.scopes.belongs_to(scope, self.module_scope)
    }

    fn enter_class_sym(&mut self, class: ClassId) -> u32 {
        if let Some(idx) = self.class_refs.get_index_of(&class) {
            return u32::try_from(idx).expect("table fits u32");
        }
        let c = self.program.syms.class(class);
        let local = self.is_local_scope(c.defined_in) || self.is_local_scope(c.class_scope);
        let entry = if local {
            let pool_idx = u32::try_from(self.class_pool.len()).expect("pool fits u32");
            self.class_pool.push(class);
            SymbolReference::Local(pool_idx)
        } else {
            SymbolReference::External(self.program.class_full_name(class))
        };
        let (idx, _) = self.class_refs.insert_full(class, entry);
        u32::try_from(idx).expect("table fits u32")
    }

    /// Resolves a type to its code-generatable class and interns it.
    fn enter_class(&mut self, it: ITypeId) -> CompileResult<u32> {
        // any is represented by object at runtime
        let it = if self.program.types.base(it) == self.program.prelude.any_t {
            self.program.prelude.object
        } else {
            it
        };
        let class = self.program.find_code_generatable_class(it)?;
        Ok(self.enter_class_sym(class))
    }

    fn enter_function(&mut self, func: FuncId) -> u32 {
        if let Some(idx) = self.func_refs.get_index_of(&func) {
            return u32::try_from(idx).expect("table fits u32");
        }
        let defined_in = self.program.syms.func(func).defined_in;
        let entry = if self.is_local_scope(defined_in) {
            let start = self.new_label();
            self.func_pool.push((func, start));
            SymbolReference::Local(
                u32::try_from(self.func_pool.len() - 1).expect("pool fits u32"),
            )
        } else {
            SymbolReference::External(self.program.func_full_name(func))
        };
        let (idx, _) = self.func_refs.insert_full(func, entry);
        u32::try_from(idx).expect("table fits u32")
    }

    fn slot_desc(&mut self, it: ITypeId) -> CompileResult<SlotDesc> {
        let p = &self.program.prelude;
        let base = self.program.types.base(it);
        Ok(if base == p.int_t {
            SlotDesc::Int
        } else if base == p.float_t {
            SlotDesc::Float
        } else if base == p.bool_t {
            SlotDesc::Bool
        } else if base == p.void_t {
            SlotDesc::Void
        } else {
            SlotDesc::ClassRef(self.enter_class(it)?)
        })
    }

    fn is_ref_type(&self, it: ITypeId) -> bool {
        self.program.is_ref_counted(it)
    }

    fn flavor(&self, it: ITypeId) -> CellKind {
        let p = &self.program.prelude;
        let base = self.program.types.base(it);
        if base == p.int_t {
            CellKind::Int
        } else if base == p.float_t {
            CellKind::Float
        } else if base == p.bool_t {
            CellKind::Bool
        } else {
            CellKind::Ref
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::ClassDecl(s) => {
                if stmt.is_type_parameterized() {
                    return Ok(());
                }
                let class = s.sym.expect("registered class");
                let self_ty = {
                    let c = self.program.syms.class(class);
                    debug_assert!(c.type_params.is_empty());
                    c.ty
                };
                let it = self.program.types.instantiate0(self_ty);
                self.enter_class(it)?;
                for kid in &s.body.stmts {
                    self.gen_stmt(kid)?;
                }
                Ok(())
            }
            Stmt::FuncDecl(s) => {
                if stmt.is_type_parameterized() {
                    return Ok(());
                }
                self.gen_func_decl(s)
            }
            Stmt::ClassAttrDecl(_) | Stmt::Import(_) => Ok(()),
            Stmt::Assign(s) => self.gen_assignment(&s.lhs, &s.rhs),
            Stmt::If(s) => {
                let cond_ty = s.cond.static_ty().expect("typed condition");
                self.gen_expr(&s.cond)?;
                let false_label = self.new_label();
                let done_label = self.new_label();
                self.emit_branch(self.branch_z_op(cond_ty), false_label);
                for kid in &s.then_body.stmts {
                    self.gen_stmt(kid)?;
                }
                self.emit_branch(Opcode::Jump, done_label);
                self.bind_label(false_label);
                for kid in &s.else_body.stmts {
                    self.gen_stmt(kid)?;
                }
                self.bind_label(done_label);
                Ok(())
            }
            Stmt::For(s) => self.gen_for(s),
            Stmt::Return(s) => {
                match &s.value {
                    Some(v) => self.gen_expr(v)?,
                    None => self.emit(Opcode::PushCellNil),
                }
                self.emit(Opcode::Ret);
                Ok(())
            }
            Stmt::Expr(s) => {
                self.gen_expr(&s.expr)?;
                let ty = s.expr.static_ty().expect("typed expression");
                self.emit(self.pop_op(ty));
                Ok(())
            }
        }
    }

    fn gen_func_decl(&mut self, s: &crate::ast::FuncDeclStmt) -> CompileResult<()> {
        let func = s.sym.expect("registered function");
        self.enter_function(func);
        // bind the function's start label here
        let start = self
            .func_pool
            .iter()
            .find(|(f, _)| *f == func)
            .map(|&(_, l)| l)
            .expect("local function in pool");
        self.bind_label(start);
        let full_local_name = {
            let f = self.program.syms.func(func);
            match f.owner_class {
                Some(c) => format!("{}.{}", self.program.syms.class(c).name, f.name),
                None => f.name.clone(),
            }
        };
        self.name_offsets.push((full_local_name, self.current_offset()));
        self.reset_locals();

        // calling convention: the stack carries ret | argN .. arg1 | arg0
        // on entry; methods receive the receiver as arg0
        let is_method = self.program.syms.func(func).is_method();
        if is_method {
            let temp = self.create_temp();
            let (idx, created) = self.create_local(temp);
            debug_assert!(created && idx == 0, "receiver claims slot 0");
            self.emit_u32(Opcode::StoreLocalVarRef, idx);
        }
        let body_scope = s.body.scope.expect("function body scope");
        let param_tys: Vec<ITypeId> = self.program.syms.func(func).params.clone();
        for (p, ty) in s.params.iter().zip(param_tys) {
            let mut t = TypeTranslator::new();
            let sym = self
                .program
                .scopes
                .find_var(body_scope, &p.name, RecurseMode::NoRecurse, &mut t)
                .expect("parameter symbol registered");
            let (idx, created) = self.create_local(LocalKey::Sym(sym));
            debug_assert!(created);
            let op = if self.is_ref_type(ty) {
                Opcode::StoreLocalVarRef
            } else {
                Opcode::StoreLocalVar
            };
            self.emit_u32(op, idx);
        }
        for kid in &s.body.stmts {
            self.gen_stmt(kid)?;
        }
        Ok(())
    }

    fn gen_for(&mut self, s: &crate::ast::ForStmt) -> CompileResult<()> {
        let iter_ty = s.iter.static_ty().expect("typed iterable");
        let elem_ty = if self.program.types.base(iter_ty) == self.program.prelude.list_t {
            self.program.types.params(iter_ty)[0]
        } else {
            self.program.prelude.string
        };
        let Expr::Ident(var) = &s.var else {
            panic!("for-loop variable is always an identifier");
        };
        let Some(SymbolRef::Var(var_sym)) = var.info.sym else {
            panic!("for-loop variable resolved before codegen");
        };

        let (size_func, _, _) = self
            .program
            .find_method_symbol(iter_ty, "size", false)
            .ok_or_else(|| CompileError::type_violation("iterable has no size method"))?;
        let size_slot = u32::try_from(self.program.vtable_slot_of(size_func))
            .expect("vtable slot fits u32");

        // lower to indexed iteration over the container
        let seq_temp = self.create_temp();
        let (seq_idx, _) = self.create_local(seq_temp);
        let idx_temp = self.create_temp();
        let (idx_idx, _) = self.create_local(idx_temp);
        let size_temp = self.create_temp();
        let (size_idx, _) = self.create_local(size_temp);
        let (var_idx, _) = self.create_local(LocalKey::Sym(var_sym));

        self.gen_expr(&s.iter)?;
        self.emit_u32(Opcode::StoreLocalVarRef, seq_idx);
        self.emit_int(Opcode::PushCellInt, 0);
        self.emit_u32(Opcode::StoreLocalVar, idx_idx);
        self.emit_u32(Opcode::LoadLocalVarRef, seq_idx);
        self.emit_u32(Opcode::CallVirtual, size_slot);
        self.emit_u32(Opcode::StoreLocalVar, size_idx);

        let loop_label = self.new_label();
        let done_label = self.new_label();
        self.bind_label(loop_label);
        self.emit_u32(Opcode::LoadLocalVar, idx_idx);
        self.emit_u32(Opcode::LoadLocalVar, size_idx);
        self.emit(Opcode::BinopCmpLtInt);
        self.emit_branch(Opcode::BranchZBool, done_label);

        // current element into the loop variable
        self.emit_u32(Opcode::LoadLocalVarRef, seq_idx);
        self.emit_u32(Opcode::LoadLocalVar, idx_idx);
        if self.is_ref_type(elem_ty) {
            self.emit(Opcode::GetArrayAccessRef);
            self.emit_u32(Opcode::StoreLocalVarRef, var_idx);
        } else {
            self.emit(Opcode::GetArrayAccess);
            self.emit_u32(Opcode::StoreLocalVar, var_idx);
        }

        for kid in &s.body.stmts {
            self.gen_stmt(kid)?;
        }

        self.emit_u32(Opcode::LoadLocalVar, idx_idx);
        self.emit_int(Opcode::PushCellInt, 1);
        self.emit(Opcode::BinopAddInt);
        self.emit_u32(Opcode::StoreLocalVar, idx_idx);
        self.emit_branch(Opcode::Jump, loop_label);
        self.bind_label(done_label);

        self.return_temp(seq_temp);
        self.return_temp(idx_temp);
        self.return_temp(size_temp);
        Ok(())
    }

    fn gen_assignment(&mut self, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
        match lhs {
            Expr::Ident(var) => {
                let Some(SymbolRef::Var(sym)) = var.info.sym else {
                    return Err(CompileError::semantic(format!(
                        "Unresolved assignment target {}",
                        var.name
                    )));
                };
                self.gen_expr(rhs)?;
                let ty = lhs.static_ty().expect("typed assignment target");
                let (idx, _) = self.create_local(LocalKey::Sym(sym));
                let op = if self.is_ref_type(ty) {
                    Opcode::StoreLocalVarRef
                } else {
                    Opcode::StoreLocalVar
                };
                self.emit_u32(op, idx);
                Ok(())
            }
            Expr::AttrAccess(attr) => {
                let Some(SymbolRef::Var(field)) = attr.info.sym else {
                    return Err(CompileError::semantic("Unresolved attribute target"));
                };
                self.gen_expr(&attr.primary)?;
                self.gen_expr(rhs)?;
                let slot = u32::try_from(self.program.field_index_of(field))
                    .expect("field slot fits u32");
                let ty = lhs.static_ty().expect("typed attribute");
                let op = if self.is_ref_type(ty) {
                    Opcode::SetAttrObjRef
                } else {
                    Opcode::SetAttrObj
                };
                self.emit_u32(op, slot);
                Ok(())
            }
            Expr::ArrayAccess(access) => {
                self.gen_expr(&access.primary)?;
                self.gen_expr(&access.index)?;
                self.gen_expr(rhs)?;
                let ty = lhs.static_ty().expect("typed element");
                let op = if self.is_ref_type(ty) {
                    Opcode::SetArrayAccessRef
                } else {
                    Opcode::SetArrayAccess
                };
                self.emit(op);
                Ok(())
            }
            _ => Err(CompileError::semantic("Invalid assignment target")),
        }
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn gen_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::IntLit(v, _) => {
                self.emit_int(Opcode::PushCellInt, *v);
                Ok(())
            }
            Expr::FloatLit(v, _) => {
                self.emit_float(Opcode::PushCellFloat, *v);
                Ok(())
            }
            Expr::BoolLit(v, _) => {
                self.emit_bool(Opcode::PushCellBool, *v);
                Ok(())
            }
            Expr::StrLit(s, _) => {
                let idx = self.create_constant(Constant::String(s.clone()));
                self.emit_u32(Opcode::PushConst, idx);
                Ok(())
            }
            Expr::SelfExpr(_) | Expr::SuperExpr(_) => {
                // the receiver always occupies slot 0
                self.emit_u32(Opcode::LoadLocalVarRef, 0);
                Ok(())
            }
            Expr::Ident(var) => match var.info.sym {
                Some(SymbolRef::Var(sym)) => {
                    let (idx, created) = self.create_local(LocalKey::Sym(sym));
                    debug_assert!(!created, "local read before first store");
                    let ty = expr.static_ty().expect("typed variable");
                    let op = if self.is_ref_type(ty) {
                        Opcode::LoadLocalVarRef
                    } else {
                        Opcode::LoadLocalVar
                    };
                    self.emit_u32(op, idx);
                    Ok(())
                }
                Some(SymbolRef::Module(m)) => {
                    // module references materialize the singleton constant
                    let class = self.program.syms.module(m).module_class;
                    let ty = self.program.syms.class(class).ty;
                    let it = self.program.types.instantiate0(ty);
                    let class_ref = self.enter_class(it)?;
                    let konst = self.create_constant(Constant::ClassRef(class_ref));
                    self.emit_u32(Opcode::PushConst, konst);
                    Ok(())
                }
                // class and function references only emit at call sites
                Some(SymbolRef::Class(_) | SymbolRef::Func(_)) => {
                    Err(CompileError::type_violation(format!(
                        "Function and class values are not supported: {}",
                        var.name
                    )))
                }
                None => Err(CompileError::semantic(format!(
                    "Unresolved symbol {} at code generation",
                    var.name
                ))),
            },
            Expr::UnOp(e) => self.gen_unop(e),
            Expr::BinOp(e) => self.gen_binop(e),
            Expr::AttrAccess(e) => {
                let Some(SymbolRef::Var(field)) = e.info.sym else {
                    return Err(CompileError::type_violation(format!(
                        "Method values are not supported: {}",
                        e.attr
                    )));
                };
                self.gen_expr(&e.primary)?;
                let slot = u32::try_from(self.program.field_index_of(field))
                    .expect("field slot fits u32");
                let ty = expr.static_ty().expect("typed attribute");
                let op = if self.is_ref_type(ty) {
                    Opcode::GetAttrObjRef
                } else {
                    Opcode::GetAttrObj
                };
                self.emit_u32(op, slot);
                Ok(())
            }
            Expr::ArrayAccess(e) => {
                self.gen_expr(&e.primary)?;
                self.gen_expr(&e.index)?;
                let ty = expr.static_ty().expect("typed element");
                let op = if self.is_ref_type(ty) {
                    Opcode::GetArrayAccessRef
                } else {
                    Opcode::GetArrayAccess
                };
                self.emit(op);
                Ok(())
            }
            Expr::Call(e) => self.gen_call(e),
            Expr::AssignExpr(e) => self.gen_assign_expr(e),
            Expr::ExprList(e) => {
                for (i, sub) in e.exprs.iter().enumerate() {
                    self.gen_expr(sub)?;
                    if i + 1 != e.exprs.len() {
                        let ty = sub.static_ty().expect("typed expression");
                        self.emit(self.pop_op(ty));
                    }
                }
                Ok(())
            }
            Expr::ListLit(_) | Expr::MapLit(_) => {
                unreachable!("literals are desugared before code generation")
            }
        }
    }

    fn gen_assign_expr(&mut self, e: &AssignExprNode) -> CompileResult<()> {
        self.gen_assignment(&e.lhs, &e.rhs)?;
        // re-load the target so the expression yields its value
        self.gen_expr(&e.lhs)
    }

    fn gen_unop(&mut self, e: &crate::ast::UnOpExpr) -> CompileResult<()> {
        self.gen_expr(&e.operand)?;
        let ty = e.operand.static_ty().expect("typed operand");
        let flavor = self.flavor(ty);
        let op = match (e.op, flavor) {
            (UnOpKind::Plus, CellKind::Int) => Opcode::UnopPlusInt,
            (UnOpKind::Plus, _) => Opcode::UnopPlusFloat,
            (UnOpKind::Minus, CellKind::Int) => Opcode::UnopMinusInt,
            (UnOpKind::Minus, _) => Opcode::UnopMinusFloat,
            (UnOpKind::CmpNot, CellKind::Int) => Opcode::UnopCmpNotInt,
            (UnOpKind::CmpNot, CellKind::Float) => Opcode::UnopCmpNotFloat,
            (UnOpKind::CmpNot, CellKind::Bool) => Opcode::UnopCmpNotBool,
            (UnOpKind::CmpNot, CellKind::Ref) => Opcode::UnopCmpNotRef,
            (UnOpKind::BitNot, _) => Opcode::UnopBitNotInt,
        };
        self.emit(op);
        Ok(())
    }

    fn gen_binop(&mut self, e: &crate::ast::BinOpExpr) -> CompileResult<()> {
        let lhs_ty = e.lhs.static_ty().expect("typed operand");
        let rhs_ty = e.rhs.static_ty().expect("typed operand");
        let p = &self.program.prelude;

        // string concatenation lowers to a concat method call
        if e.op == BinOpKind::Add && lhs_ty == p.string {
            let (concat, _, _) = self
                .program
                .find_method_symbol(lhs_ty, "concat", false)
                .expect("string has concat");
            let slot =
                u32::try_from(self.program.vtable_slot_of(concat)).expect("slot fits u32");
            self.gen_expr(&e.rhs)?;
            self.gen_expr(&e.lhs)?;
            self.emit_u32(Opcode::CallVirtual, slot);
            return Ok(());
        }

        let result_ty = e.info.static_ty.expect("typed binop");
        let int_t = self.program.prelude.int;
        let widen = self.program.is_numeric(result_ty)
            && self.flavor(result_ty) == CellKind::Float;
        let widen_cmp = e.op.is_comparison()
            && (self.flavor(lhs_ty) == CellKind::Float || self.flavor(rhs_ty) == CellKind::Float);
        let as_float = widen || widen_cmp;

        self.gen_expr(&e.lhs)?;
        if as_float && lhs_ty == int_t {
            self.emit(Opcode::IntToFloat);
        }
        self.gen_expr(&e.rhs)?;
        if as_float && rhs_ty == int_t {
            self.emit(Opcode::IntToFloat);
        }

        let flavor = if as_float {
            CellKind::Float
        } else {
            self.flavor(lhs_ty)
        };
        let op = binop_opcode(e.op, flavor)?;
        self.emit(op);
        Ok(())
    }

    fn gen_call(&mut self, e: &crate::ast::CallExpr) -> CompileResult<()> {
        let callee_ty = e.callee.static_ty().expect("typed callee");
        if self.program.types.base(callee_ty) == self.program.prelude.classtype_t {
            return self.gen_construction(e, callee_ty);
        }

        let Some(SymbolRef::Func(func)) = e.callee.info().sym else {
            return Err(CompileError::type_violation(
                "Cannot invoke non-function expression",
            ));
        };

        // arguments go on the stack in reverse order
        for arg in e.args.iter().rev() {
            self.gen_expr(arg)?;
        }

        if self.program.syms.func(func).is_method() {
            let Expr::AttrAccess(attr) = e.callee.as_ref() else {
                return Err(CompileError::semantic(
                    "Method call without an explicit receiver",
                ));
            };
            // the receiver rides on top of the arguments
            self.gen_expr(&attr.primary)?;

            let is_super_invoke = matches!(attr.primary.as_ref(), Expr::SuperExpr(_));
            if is_super_invoke {
                // constructors and super-calls bypass the vtable
                let super_ty = attr.primary.static_ty().expect("typed super");
                let name = self.program.syms.func(func).name.clone();
                let (resolved, klass, _) = self
                    .program
                    .find_method_symbol(super_ty, &name, false)
                    .ok_or_else(|| {
                        CompileError::type_violation(format!("No super method {name}"))
                    })?;
                let concrete = self.resolve_in_code_gen_class(resolved, klass)?;
                let fidx = self.enter_function(concrete);
                let native = self.program.syms.func(concrete).native;
                self.emit_u32(
                    if native { Opcode::CallNative } else { Opcode::Call },
                    fidx,
                );
            } else {
                let slot = u32::try_from(self.program.vtable_slot_of(func))
                    .expect("vtable slot fits u32");
                self.emit_u32(Opcode::CallVirtual, slot);
            }
            return Ok(());
        }

        // plain call: generic origins resolve to their monomorphized
        // instances here
        let type_args = e.callee.info().type_args.clone();
        let bf = BoundFunction::new(func, type_args);
        let resolved = self
            .program
            .find_specialized_func(&bf)
            .ok_or_else(|| {
                CompileError::type_violation(format!(
                    "No monomorphized instance of {}",
                    self.program.syms.func(func).name
                ))
            })?;
        let fidx = self.enter_function(resolved);
        let native = self.program.syms.func(resolved).native;
        self.emit_u32(
            if native { Opcode::CallNative } else { Opcode::Call },
            fidx,
        );
        Ok(())
    }

    fn gen_construction(&mut self, e: &crate::ast::CallExpr, callee_ty: ITypeId) -> CompileResult<()> {
        let obj_ty = self.program.types.params(callee_ty)[0];
        let class_idx = self.enter_class(obj_ty)?;
        let class = self.program.find_code_generatable_class(obj_ty)?;
        let ctor = self
            .program
            .ctor_of(class)
            .ok_or_else(|| CompileError::type_violation("Type has no constructor"))?;

        // allocate, stash in a temporary, push args in reverse, reload the
        // receiver, call the constructor directly (never virtually)
        self.emit_u32(Opcode::AllocObj, class_idx);
        let temp = self.create_temp();
        let (temp_idx, _) = self.create_local(temp);
        self.emit_u32(Opcode::StoreLocalVarRef, temp_idx);

        for arg in e.args.iter().rev() {
            self.gen_expr(arg)?;
        }
        self.emit_u32(Opcode::LoadLocalVarRef, temp_idx);

        let fidx = self.enter_function(ctor);
        let native = self.program.syms.func(ctor).native;
        self.emit_u32(
            if native { Opcode::CallNative } else { Opcode::Call },
            fidx,
        );
        // constructors return void
        self.emit(Opcode::PopCellRef);
        self.emit_u32(Opcode::LoadLocalVarRef, temp_idx);
        self.return_temp(temp);
        Ok(())
    }

    /// Finds the concrete declaration of `func` on the code-generatable
    /// class realizing `klass`.
    fn resolve_in_code_gen_class(&mut self, func: FuncId, klass: ITypeId) -> CompileResult<FuncId> {
        let class = self.program.find_code_generatable_class(klass)?;
        let scope = self.program.syms.class(class).class_scope;
        let name = self.program.syms.func(func).name.clone();
        let mut t = TypeTranslator::new();
        self.program
            .scopes
            .find_func(scope, &name, RecurseMode::NoRecurse, &mut t)
            .ok_or_else(|| {
                CompileError::type_violation(format!("Method {name} not found on concrete class"))
            })
    }

    fn branch_z_op(&self, cond_ty: ITypeId) -> Opcode {
        match self.flavor(cond_ty) {
            CellKind::Int => Opcode::BranchZInt,
            CellKind::Float => Opcode::BranchZFloat,
            CellKind::Bool => Opcode::BranchZBool,
            CellKind::Ref => Opcode::BranchZRef,
        }
    }

    fn pop_op(&self, ty: ITypeId) -> Opcode {
        if self.is_ref_type(ty) || self.program.types.base(ty) == self.program.prelude.void_t {
            Opcode::PopCellRef
        } else {
            Opcode::PopCell
        }
    }

    // ------------------------------------------------------------------
    // finalization
    // ------------------------------------------------------------------

    /// Closes the pools over every dependent class and function, then
    /// materializes the signatures and reference tables.
    fn create_object_code(mut self) -> CompileResult<ObjectCode> {
        // iterate to fixed point: building signatures must not discover new
        // dependencies
        let mut class_cursor = 0;
        let mut func_cursor = 0;
        loop {
            let mut progressed = false;
            while class_cursor < self.class_pool.len() {
                progressed = true;
                let class = self.class_pool[class_cursor];
                class_cursor += 1;
                let layout = self.program.linearized_order(class);
                for attr in layout.attributes {
                    let ty = self
                        .program
                        .syms
                        .var(attr)
                        .ty
                        .expect("attribute type known");
                    self.slot_desc(ty)?;
                }
                for method in layout.methods {
                    self.enter_function(method);
                }
                if let Some(ctor) = self.program.ctor_of(class) {
                    self.enter_function(ctor);
                }
            }
            while func_cursor < self.func_refs.len() {
                progressed = true;
                let func = *self
                    .func_refs
                    .get_index(func_cursor)
                    .map(|(f, _)| f)
                    .expect("cursor in range");
                func_cursor += 1;
                let (params, ret) = {
                    let f = self.program.syms.func(func);
                    (f.params.clone(), f.ret)
                };
                for p in params {
                    self.slot_desc(p)?;
                }
                self.slot_desc(ret)?;
            }
            if !progressed {
                break;
            }
        }

        // class signatures
        let mut class_sigs = Vec::with_capacity(self.class_pool.len());
        for i in 0..self.class_pool.len() {
            let class = self.class_pool[i];
            let layout = self.program.linearized_order(class);
            let mut attributes = Vec::with_capacity(layout.attributes.len());
            for attr in &layout.attributes {
                let ty = self
                    .program
                    .syms
                    .var(*attr)
                    .ty
                    .expect("attribute type known");
                attributes.push(self.slot_desc(ty)?);
            }
            let mut methods = Vec::with_capacity(layout.methods.len());
            for m in &layout.methods {
                methods.push(self.enter_function(*m));
            }
            let is_module_class = self.program.syms.class(class).is_module_class;
            let ctor = if is_module_class {
                None
            } else {
                let ctor = self.program.ctor_of(class).ok_or_else(|| {
                    CompileError::semantic("class lost its constructor before code generation")
                })?;
                Some(self.enter_function(ctor))
            };
            class_sigs.push(ClassSignature {
                name: self.program.syms.class(class).name.clone(),
                attributes,
                ctor,
                methods,
            });
        }

        // function signatures for local functions
        let mut func_sigs = Vec::with_capacity(self.func_pool.len());
        for i in 0..self.func_pool.len() {
            let (func, start_label) = self.func_pool[i];
            let (params, ret, owner, name) = {
                let f = self.program.syms.func(func);
                (f.params.clone(), f.ret, f.owner_class, f.name.clone())
            };
            let mut parameters = Vec::with_capacity(params.len());
            for p in params {
                parameters.push(self.slot_desc(p)?);
            }
            let ret = self.slot_desc(ret)?;
            func_sigs.push(FunctionSignature {
                class_name: owner.map(|c| self.program.syms.class(c).name.clone()),
                name,
                parameters,
                ret,
                code_offset: self.labels[start_label as usize].bound_index(),
            });
        }

        let constant_pool: Vec<Constant> = self.constant_pool.into_keys().collect();
        let class_reference_table: Vec<SymbolReference> =
            self.class_refs.into_values().collect();
        let func_reference_table: Vec<SymbolReference> =
            self.func_refs.into_values().collect();

        Ok(ObjectCode {
            module_name: self.module,
            constant_pool,
            class_pool: class_sigs,
            class_reference_table,
            func_pool: func_sigs,
            func_reference_table,
            instructions: self.instructions,
            labels: self.labels,
            name_offsets: self.name_offsets,
        })
    }
}

fn binop_opcode(op: BinOpKind, flavor: CellKind) -> CompileResult<Opcode> {
    use CellKind as K;
    use Opcode as O;
    let found = match (op, flavor) {
        (BinOpKind::Add, K::Int) => O::BinopAddInt,
        (BinOpKind::Add, K::Float) => O::BinopAddFloat,
        (BinOpKind::Sub, K::Int) => O::BinopSubInt,
        (BinOpKind::Sub, K::Float) => O::BinopSubFloat,
        (BinOpKind::Mult, K::Int) => O::BinopMultInt,
        (BinOpKind::Mult, K::Float) => O::BinopMultFloat,
        (BinOpKind::Div, K::Int) => O::BinopDivInt,
        (BinOpKind::Div, K::Float) => O::BinopDivFloat,
        (BinOpKind::Mod, K::Int) => O::BinopModInt,
        (BinOpKind::CmpAnd, K::Int) => O::BinopCmpAndInt,
        (BinOpKind::CmpAnd, K::Float) => O::BinopCmpAndFloat,
        (BinOpKind::CmpAnd, K::Bool) => O::BinopCmpAndBool,
        (BinOpKind::CmpAnd, K::Ref) => O::BinopCmpAndRef,
        (BinOpKind::CmpOr, K::Int) => O::BinopCmpOrInt,
        (BinOpKind::CmpOr, K::Float) => O::BinopCmpOrFloat,
        (BinOpKind::CmpOr, K::Bool) => O::BinopCmpOrBool,
        (BinOpKind::CmpOr, K::Ref) => O::BinopCmpOrRef,
        (BinOpKind::CmpLt, K::Int) => O::BinopCmpLtInt,
        (BinOpKind::CmpLt, K::Float) => O::BinopCmpLtFloat,
        (BinOpKind::CmpLt, K::Bool) => O::BinopCmpLtBool,
        (BinOpKind::CmpLe, K::Int) => O::BinopCmpLeInt,
        (BinOpKind::CmpLe, K::Float) => O::BinopCmpLeFloat,
        (BinOpKind::CmpLe, K::Bool) => O::BinopCmpLeBool,
        (BinOpKind::CmpGt, K::Int) => O::BinopCmpGtInt,
        (BinOpKind::CmpGt, K::Float) => O::BinopCmpGtFloat,
        (BinOpKind::CmpGt, K::Bool) => O::BinopCmpGtBool,
        (BinOpKind::CmpGe, K::Int) => O::BinopCmpGeInt,
        (BinOpKind::CmpGe, K::Float) => O::BinopCmpGeFloat,
        (BinOpKind::CmpGe, K::Bool) => O::BinopCmpGeBool,
        (BinOpKind::CmpEq, K::Int) => O::BinopCmpEqInt,
        (BinOpKind::CmpEq, K::Float) => O::BinopCmpEqFloat,
        (BinOpKind::CmpEq, K::Bool) => O::BinopCmpEqBool,
        (BinOpKind::CmpEq, K::Ref) => O::BinopCmpEqRef,
        (BinOpKind::CmpNeq, K::Int) => O::BinopCmpNeqInt,
        (BinOpKind::CmpNeq, K::Float) => O::BinopCmpNeqFloat,
        (BinOpKind::CmpNeq, K::Bool) => O::BinopCmpNeqBool,
        (BinOpKind::CmpNeq, K::Ref) => O::BinopCmpNeqRef,
        (BinOpKind::BitAnd, K::Int) => O::BinopBitAndInt,
        (BinOpKind::BitAnd, K::Bool) => O::BinopBitAndBool,
        (BinOpKind::BitOr, K::Int) => O::BinopBitOrInt,
        (BinOpKind::BitOr, K::Bool) => O::BinopBitOrBool,
        (BinOpKind::BitXor, K::Int) => O::BinopBitXorInt,
        (BinOpKind::BitXor, K::Bool) => O::BinopBitXorBool,
        (BinOpKind::BitLshift, K::Int) => O::BinopBitLshiftInt,
        (BinOpKind::BitRshift, K::Int) => O::BinopBitRshiftInt,
        _ => {
            return Err(CompileError::type_violation(
                "No instruction flavor for operator and operand types",
            ));
        }
    };
    Ok(found)
}
