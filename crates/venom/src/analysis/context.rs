//! The program-wide analysis context.
//!
//! One [`Program`] owns the type, scope, and symbol arenas for every module
//! in a compilation, plus the read-only prelude of built-in types created
//! once at startup and threaded through the analyzer explicitly.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use crate::{
    analysis::{
        scope::{RecurseMode, ScopeArena, ScopeId, ScopeOwner},
        symbol::{
            BoundFunction, CTOR_NAME, ClassId, ClassSymbol, FuncId, FuncSymbol, ModuleId,
            ModuleSymbol, Symbols, VarId, VarSymbol, mangle_name,
        },
        types::{ITypeId, TypeArena, TypeId, TypeTranslator},
    },
    ast::{StmtList, TypeSpec},
    error::{CompileError, CompileResult},
};

/// The module name all builtins live under.
pub const PRELUDE_MODULE: &str = "<prelude>";

/// Handles to the built-in types and classes, created once per program.
#[derive(Debug)]
pub struct Prelude {
    pub any_t: TypeId,
    pub int_t: TypeId,
    pub bool_t: TypeId,
    pub float_t: TypeId,
    pub string_t: TypeId,
    pub void_t: TypeId,
    pub object_t: TypeId,
    pub boxed_int_t: TypeId,
    pub boxed_float_t: TypeId,
    pub boxed_bool_t: TypeId,
    pub ref_t: TypeId,
    pub classtype_t: TypeId,
    pub moduletype_t: TypeId,
    pub boundless_t: TypeId,
    pub list_t: TypeId,
    pub map_t: TypeId,
    /// `func0` .. `func19`; `func_t[n]` has arity `n + 1` (params + return).
    pub func_t: Vec<TypeId>,

    pub any: ITypeId,
    pub int: ITypeId,
    pub bool_: ITypeId,
    pub float: ITypeId,
    pub string: ITypeId,
    pub void: ITypeId,
    pub object: ITypeId,
    pub boxed_int: ITypeId,
    pub boxed_float: ITypeId,
    pub boxed_bool: ITypeId,
    pub moduletype: ITypeId,
    pub boundless: ITypeId,

    pub object_class: ClassId,
    pub string_class: ClassId,
    pub boxed_int_class: ClassId,
    pub boxed_float_class: ClassId,
    pub boxed_bool_class: ClassId,
    pub ref_class: ClassId,
    pub list_class: ClassId,
    pub map_class: ClassId,

    pub print_func: FuncId,
}

/// One compiled (or in-compilation) module.
#[derive(Debug)]
pub struct ModuleEntry {
    /// Dotted module name; also the fully-qualified prefix of its symbols.
    pub name: String,
    pub root_scope: ScopeId,
    pub module_class: ClassId,
    pub module_sym: ModuleId,
    /// The module AST; taken out while a pipeline stage runs over it.
    pub ast: Option<StmtList>,
}

#[derive(Debug)]
pub struct Program {
    pub types: TypeArena,
    pub scopes: ScopeArena,
    pub syms: Symbols,
    pub prelude: Prelude,
    pub root_scope: ScopeId,
    pub modules: IndexMap<String, ModuleEntry>,
    /// Monomorphization requests collected during type checking.
    pub func_specs: IndexMap<FuncId, IndexSet<Vec<ITypeId>>>,
    pub class_specs: IndexMap<ClassId, IndexSet<ITypeId>>,
    unique: u64,
    /// Cache of computed field/vtable layouts, keyed by class symbol.
    layout_cache: AHashMap<ClassId, ClassLayout>,
}

/// Linearized field and vtable order of a class.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    pub attributes: Vec<VarId>,
    pub methods: Vec<FuncId>,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        let mut types = TypeArena::new();
        let mut scopes = ScopeArena::new();
        let mut syms = Symbols::new();
        let root_scope = scopes.new_root(PRELUDE_MODULE);

        let prelude = bootstrap_prelude(&mut types, &mut scopes, &mut syms, root_scope);

        Self {
            types,
            scopes,
            syms,
            prelude,
            root_scope,
            modules: IndexMap::new(),
            func_specs: IndexMap::new(),
            class_specs: IndexMap::new(),
            unique: 0,
            layout_cache: AHashMap::new(),
        }
    }

    pub fn unique_id(&mut self) -> u64 {
        let id = self.unique;
        self.unique += 1;
        id
    }

    /// The module a scope's symbols are qualified under.
    #[must_use]
    pub fn scope_module(&self, scope: ScopeId) -> &str {
        &self.scopes.get(scope).module
    }

    /// `module.name` for plain symbols, `module.Class.name` for methods.
    #[must_use]
    pub fn func_full_name(&self, id: FuncId) -> String {
        let f = self.syms.func(id);
        match f.owner_class {
            Some(c) => format!("{}.{}", self.class_full_name(c), f.name),
            None => format!("{}.{}", self.scope_module(f.defined_in), f.name),
        }
    }

    #[must_use]
    pub fn class_full_name(&self, id: ClassId) -> String {
        let c = self.syms.class(id);
        // module singletons qualify under the module they represent
        let module = if c.is_module_class {
            self.scope_module(c.class_scope)
        } else {
            self.scope_module(c.defined_in)
        };
        format!("{module}.{}", c.name)
    }

    /// `ref{T}` over the given element type.
    pub fn refify(&mut self, it: ITypeId) -> ITypeId {
        let ref_t = self.prelude.ref_t;
        self.types.instantiate(ref_t, &[it])
    }

    #[must_use]
    pub fn is_primitive(&self, it: ITypeId) -> bool {
        let b = self.types.base(it);
        b == self.prelude.int_t || b == self.prelude.bool_t || b == self.prelude.float_t
    }

    #[must_use]
    pub fn is_numeric(&self, it: ITypeId) -> bool {
        let b = self.types.base(it);
        b == self.prelude.int_t || b == self.prelude.float_t
    }

    /// Reference-counted at runtime: anything that is not a primitive or
    /// void.
    #[must_use]
    pub fn is_ref_counted(&self, it: ITypeId) -> bool {
        !self.is_primitive(it) && self.types.base(it) != self.prelude.void_t
    }

    /// Visible types can be stored in variables; module types cannot.
    #[must_use]
    pub fn is_visible_type(&mut self, it: ITypeId) -> bool {
        !self.is_module_type(it)
    }

    #[must_use]
    pub fn is_module_type(&mut self, it: ITypeId) -> bool {
        let modtype = self.prelude.moduletype;
        self.types.is_subtype_of(it, modtype)
    }

    /// Creates a class symbol, links its type, and wires the inheritance
    /// parent into the class scope (with the parameter substitutions the
    /// boundary introduces).
    pub fn create_class_symbol(
        &mut self,
        scope: ScopeId,
        name: &str,
        class_scope: ScopeId,
        ty: TypeId,
        type_params: Vec<ITypeId>,
        specialization: Option<ITypeId>,
        is_module_class: bool,
    ) -> ClassId {
        let id = self.syms.add_class(ClassSymbol {
            name: name.to_owned(),
            defined_in: scope,
            class_scope,
            ty,
            type_params,
            lifted: None,
            lifter: None,
            specialization,
            is_module_class,
        });
        self.types.set_class_sym(ty, id);
        self.scopes.insert_class(scope, name, id);
        self.scopes.get_mut(class_scope).owner = ScopeOwner::Class(id);

        if let Some(parent) = self.types.ty(ty).parent {
            let mut t = TypeTranslator::new();
            t.bind(&self.types, parent);
            let parent_base = self.types.base(parent);
            if let Some(parent_class) = self.types.ty(parent_base).class_sym {
                let parent_scope = self.syms.class(parent_class).class_scope;
                self.scopes
                    .add_class_parent(class_scope, parent, parent_scope, t.map);
            }
        }
        id
    }

    pub fn create_func_symbol(
        &mut self,
        scope: ScopeId,
        name: &str,
        inner_scope: ScopeId,
        type_params: Vec<ITypeId>,
        params: Vec<ITypeId>,
        ret: ITypeId,
        native: bool,
        owner_class: Option<ClassId>,
        is_override: bool,
    ) -> FuncId {
        let id = self.syms.add_func(FuncSymbol {
            name: name.to_owned(),
            defined_in: scope,
            inner_scope,
            type_params,
            params,
            ret,
            native,
            owner_class,
            is_override,
        });
        self.scopes.insert_func(scope, name, id);
        self.scopes.get_mut(inner_scope).owner = ScopeOwner::Func(id);
        id
    }

    pub fn create_var_symbol(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Option<ITypeId>,
        owner_class: Option<ClassId>,
        private: bool,
    ) -> VarId {
        let id = self.syms.add_var(VarSymbol {
            name: name.to_owned(),
            defined_in: scope,
            ty,
            promote_to_ref: false,
            owner_class,
            private,
        });
        self.scopes.insert_var(scope, name, id);
        id
    }

    /// Resolves a type annotation in `scope`, caching the result on the
    /// spec. Dotted paths traverse module symbols.
    pub fn resolve_type_spec(&mut self, spec: &mut TypeSpec, scope: ScopeId) -> CompileResult<ITypeId> {
        if let Some(it) = spec.resolved {
            return Ok(it);
        }
        let it = self.resolve_type_path(&spec.path, &mut spec.args, scope)?;
        spec.resolved = Some(it);
        Ok(it)
    }

    fn resolve_type_path(
        &mut self,
        path: &[String],
        args: &mut [TypeSpec],
        scope: ScopeId,
    ) -> CompileResult<ITypeId> {
        assert!(!path.is_empty(), "synthetic type spec lost its resolution");
        let mut lookup_scope = scope;
        let mut mode = RecurseMode::AllowCurrentScope;
        // all but the last segment must name modules
        for seg in &path[..path.len() - 1] {
            let Some(m) = self.scopes.find_module(lookup_scope, seg, mode) else {
                return Err(CompileError::semantic(format!(
                    "No such module {seg} in scope"
                )));
            };
            lookup_scope = self.syms.module(m).module_scope;
            mode = RecurseMode::NoRecurse;
        }
        let last = path.last().expect("non-empty path");
        let mut translator = TypeTranslator::new();
        let Some(class) = self
            .scopes
            .find_class(lookup_scope, last, mode, &mut translator)
        else {
            return Err(CompileError::semantic(format!(
                "Type {last} is not defined in scope"
            )));
        };
        let ty = self.syms.class(class).ty;
        let arity = self.types.ty(ty).arity;
        if arity != args.len() {
            return Err(CompileError::type_violation(format!(
                "Type {last} expects {arity} type arguments, got {}",
                args.len()
            )));
        }
        let mut resolved_args = Vec::with_capacity(args.len());
        for arg in args {
            resolved_args.push(self.resolve_type_spec(arg, scope)?);
        }
        let it = self.types.instantiate(ty, &resolved_args);
        let it = translator.translate(&mut self.types, it);
        // annotations demand monomorphized classes just like constructions
        self.record_class_spec(it);
        Ok(it)
    }

    /// The instantiated function type of `func{type_args}` (a `funcN`
    /// application over params and return), translated through `outer`.
    pub fn func_itype(
        &mut self,
        func: FuncId,
        type_args: &[ITypeId],
        outer: &TypeTranslator,
    ) -> CompileResult<ITypeId> {
        let f = self.syms.func(func);
        let name = f.name.clone();
        let type_params = f.type_params.clone();
        let params = f.params.clone();
        let ret = f.ret;
        if type_params.len() != type_args.len() {
            return Err(CompileError::type_violation(format!(
                "Expected {} type arguments to function {name}, got {}",
                type_params.len(),
                type_args.len()
            )));
        }
        if params.len() >= self.prelude.func_t.len() {
            return Err(CompileError::type_violation(format!(
                "Too many parameters to function {name}"
            )));
        }
        let mut t = outer.clone();
        t.bind_pairs(&type_params, type_args);
        let mut fparams = params;
        fparams.push(ret);
        let fty = self.prelude.func_t[fparams.len() - 1];
        let it = self.types.instantiate(fty, &fparams);
        Ok(t.translate(&mut self.types, it))
    }

    /// Walks the parent chain of `it` looking for a method. Returns the
    /// method plus the instantiated type that introduced it. With
    /// `find_orig_def`, keeps walking to the original definition.
    pub fn find_method_symbol(
        &mut self,
        it: ITypeId,
        name: &str,
        find_orig_def: bool,
    ) -> Option<(FuncId, ITypeId, TypeTranslator)> {
        let mut found: Option<(FuncId, ITypeId, TypeTranslator)> = None;
        let mut cur = Some(it);
        while let Some(level) = cur {
            let base = self.types.base(level);
            if let Some(class) = self.types.ty(base).class_sym {
                let class_scope = self.syms.class(class).class_scope;
                let mut t = TypeTranslator::new();
                t.bind(&self.types, level);
                if let Some(f) =
                    self.scopes
                        .find_func(class_scope, name, RecurseMode::NoRecurse, &mut t)
                {
                    found = Some((f, level, t));
                    if !find_orig_def {
                        return found;
                    }
                }
            }
            cur = self.types.parent_of(level);
        }
        found
    }

    /// The class symbol code can be generated against for `it`: the plain
    /// class for unparameterized types, the monomorphized symbol for fully
    /// instantiated parameterized types (creating builtin specializations
    /// on demand).
    pub fn find_code_generatable_class(&mut self, it: ITypeId) -> CompileResult<ClassId> {
        let base = self.types.base(it);
        let Some(class) = self.types.ty(base).class_sym else {
            return Err(CompileError::type_violation(format!(
                "Type {} has no class symbol",
                self.types.stringify(it)
            )));
        };
        if self.types.params(it).is_empty() {
            return Ok(self.syms.follow_lifted_chain(class));
        }
        let mangled = self.types.stringify(it);
        let def_scope = self.syms.class(class).defined_in;
        let mut t = TypeTranslator::new();
        if let Some(found) =
            self.scopes
                .find_class(def_scope, &mangled, RecurseMode::NoRecurse, &mut t)
        {
            return Ok(found);
        }
        // builtin parameterized classes specialize on demand; user classes
        // get their monomorphs inserted by the specialization pass
        if self.is_builtin_parameterized(base) {
            return self.instantiate_specialized_builtin(class, it);
        }
        Err(CompileError::type_violation(format!(
            "No monomorphized class for {mangled}"
        )))
    }

    #[must_use]
    pub fn is_builtin_parameterized(&self, base: TypeId) -> bool {
        base == self.prelude.list_t
            || base == self.prelude.map_t
            || base == self.prelude.ref_t
            || self.prelude.func_t.contains(&base)
    }

    /// Creates the specialized class symbol realizing a fully-instantiated
    /// builtin type such as `list{int}`, cloning the generic's attributes
    /// and methods with parameters substituted.
    pub fn instantiate_specialized_builtin(
        &mut self,
        generic: ClassId,
        it: ITypeId,
    ) -> CompileResult<ClassId> {
        debug_assert!(self.types.is_fully_instantiated(it));
        let g = self.syms.class(generic);
        let def_scope = g.defined_in;
        let generic_scope = g.class_scope;
        let generic_ty = g.ty;

        let mut t = TypeTranslator::new();
        t.bind(&self.types, it);

        let parent = self
            .types
            .ty(generic_ty)
            .parent
            .expect("builtin parameterized types have parents");
        let parent_it = t.translate(&mut self.types, parent);

        let mangled = self.types.stringify(it);
        let new_ty = self
            .types
            .create_type(mangled.clone(), Some(parent_it), 0, Vec::new());
        let new_scope = self.scopes.new_child(def_scope, ScopeOwner::None);
        let new_class = self.create_class_symbol(
            def_scope,
            &mangled,
            new_scope,
            new_ty,
            Vec::new(),
            Some(it),
            false,
        );

        // clone attributes, then methods, preserving declaration order
        let attrs: Vec<VarId> = self.scopes.get(generic_scope).var_symbols().collect();
        for a in attrs {
            let (name, ty, private) = {
                let v = self.syms.var(a);
                (v.name.clone(), v.ty, v.private)
            };
            let ty = ty.map(|x| t.translate(&mut self.types, x));
            self.create_var_symbol(new_scope, &name, ty, Some(new_class), private);
        }
        let methods: Vec<FuncId> = self.scopes.get(generic_scope).func_symbols().collect();
        for m in methods {
            let (name, type_params, params, ret, native) = {
                let f = self.syms.func(m);
                (
                    f.name.clone(),
                    f.type_params.clone(),
                    f.params.clone(),
                    f.ret,
                    f.native,
                )
            };
            let params: Vec<ITypeId> = params
                .iter()
                .map(|&p| t.translate(&mut self.types, p))
                .collect();
            let ret = t.translate(&mut self.types, ret);
            let mut tt = TypeTranslator::new();
            let overrides = self
                .scopes
                .find_func(new_scope, &name, RecurseMode::ClassParents, &mut tt)
                .is_some();
            let inner = self.scopes.new_child(new_scope, ScopeOwner::None);
            self.create_func_symbol(
                new_scope,
                &name,
                inner,
                type_params,
                params,
                ret,
                native,
                Some(new_class),
                overrides,
            );
        }
        Ok(new_class)
    }

    /// Records a request to monomorphize `bf`; consumed by the
    /// specialization pass.
    pub fn record_func_spec(&mut self, bf: &BoundFunction) {
        if bf.type_args.is_empty() {
            return;
        }
        if !bf
            .type_args
            .iter()
            .all(|&a| self.types.is_fully_instantiated(a))
        {
            return;
        }
        self.func_specs
            .entry(bf.func)
            .or_default()
            .insert(bf.type_args.clone());
    }

    pub fn record_class_spec(&mut self, it: ITypeId) {
        if self.types.params(it).is_empty() || !self.types.is_fully_instantiated(it) {
            return;
        }
        let base = self.types.base(it);
        if self.is_builtin_parameterized(base) {
            return;
        }
        if let Some(class) = self.types.ty(base).class_sym {
            self.class_specs.entry(class).or_default().insert(it);
        }
    }

    /// Finds the monomorphized instance of `bf`, if already inserted.
    pub fn find_specialized_func(&mut self, bf: &BoundFunction) -> Option<FuncId> {
        if bf.type_args.is_empty() {
            return Some(bf.func);
        }
        let mangled = bf.mangled_name(&self.syms, &self.types);
        let def_scope = self.syms.func(bf.func).defined_in;
        let mut t = TypeTranslator::new();
        self.scopes
            .find_func(def_scope, &mangled, RecurseMode::NoRecurse, &mut t)
    }

    /// The deterministic concatenation of attributes and methods walking
    /// parents first, then this class; the basis for field slot indices
    /// and vtable indices. Module classes expose only their attributes.
    pub fn linearized_order(&mut self, class: ClassId) -> ClassLayout {
        if let Some(cached) = self.layout_cache.get(&class) {
            return cached.clone();
        }
        let layout = self.compute_linearized_order(class);
        self.layout_cache.insert(class, layout.clone());
        layout
    }

    fn compute_linearized_order(&mut self, class: ClassId) -> ClassLayout {
        let c = self.syms.class(class);
        let class_scope = c.class_scope;
        if c.is_module_class {
            return ClassLayout {
                attributes: self.scopes.get(class_scope).var_symbols().collect(),
                methods: Vec::new(),
            };
        }

        // resolve the scope chain against code-generatable parents
        let mut scope_chain = Vec::new();
        self.linearized_scopes(class_scope, &mut scope_chain);

        let mut attributes = Vec::new();
        let mut methods: Vec<FuncId> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();
        for scope in scope_chain {
            attributes.extend(self.scopes.get(scope).var_symbols());
            let funcs: Vec<FuncId> = self.scopes.get(scope).func_symbols().collect();
            for f in funcs {
                let fs = self.syms.func(f);
                if fs.is_ctor() {
                    continue;
                }
                let name = fs.name.clone();
                if fs.is_override {
                    if let Some(&slot) = index.get(&name) {
                        methods[slot] = f;
                        continue;
                    }
                }
                index.insert(name, methods.len());
                methods.push(f);
            }
        }
        ClassLayout {
            attributes,
            methods,
        }
    }

    fn linearized_scopes(&mut self, class_scope: ScopeId, out: &mut Vec<ScopeId>) {
        let parents: Vec<ITypeId> = self
            .scopes
            .get(class_scope)
            .class_parents
            .iter()
            .map(|p| p.itype)
            .collect();
        for p in parents {
            let pclass = self
                .find_code_generatable_class(p)
                .expect("parent class resolvable at layout time");
            let pscope = self.syms.class(pclass).class_scope;
            self.linearized_scopes(pscope, out);
        }
        out.push(class_scope);
    }

    /// Field slot of an attribute or module-level variable.
    pub fn field_index_of(&mut self, var: VarId) -> usize {
        let owner = self.class_for_slot_calc(var);
        let layout = self.linearized_order(owner);
        layout
            .attributes
            .iter()
            .position(|&a| a == var)
            .expect("symbol missing from its class layout")
    }

    /// Vtable slot of a method.
    pub fn vtable_slot_of(&mut self, func: FuncId) -> usize {
        let owner = self
            .syms
            .func(func)
            .owner_class
            .expect("vtable slot requested for non-method");
        let layout = self.linearized_order(owner);
        layout
            .methods
            .iter()
            .position(|&m| {
                m == func || {
                    // an override may be asked through the overridden symbol
                    let a = self.syms.func(m);
                    let b = self.syms.func(func);
                    a.name == b.name
                }
            })
            .expect("method missing from its class vtable")
    }

    fn class_for_slot_calc(&mut self, var: VarId) -> ClassId {
        let v = self.syms.var(var);
        if let Some(owner) = v.owner_class {
            return owner;
        }
        // module-level variable: slots live on the module singleton
        let module = self.scope_module(v.defined_in).to_owned();
        self.modules
            .get(&module)
            .expect("module-level symbol outside any module")
            .module_class
    }

    /// Drops cached layouts; called after passes that add class members.
    pub fn invalidate_layouts(&mut self) {
        self.layout_cache.clear();
    }

    /// Registers a new module: creates its root scope, singleton class, and
    /// module symbol (under the full dotted name, in the program root).
    pub fn register_module(&mut self, dotted: &str) -> ScopeId {
        assert!(!self.modules.contains_key(dotted), "module registered twice");
        let module_scope =
            self.scopes
                .new_child_in_module(self.root_scope, ScopeOwner::Module, dotted);

        let modtype_parent = self.prelude.moduletype;
        let module_ty = self.types.create_type(
            format!("{dotted}$$<module>"),
            Some(modtype_parent),
            0,
            Vec::new(),
        );
        let class_name = self.types.ty(module_ty).name.clone();
        let module_class = self.create_class_symbol(
            self.root_scope,
            &class_name,
            module_scope,
            module_ty,
            Vec::new(),
            None,
            true,
        );
        let module_sym = self.syms.add_module(ModuleSymbol {
            name: dotted.to_owned(),
            defined_in: self.root_scope,
            module_scope,
            module_class,
            origin_module: dotted.to_owned(),
        });
        self.scopes.insert_module(self.root_scope, dotted, module_sym);

        self.modules.insert(
            dotted.to_owned(),
            ModuleEntry {
                name: dotted.to_owned(),
                root_scope: module_scope,
                module_class,
                module_sym,
                ast: None,
            },
        );
        module_scope
    }

    /// Mangled monomorph name for a function + tuple.
    #[must_use]
    pub fn mangled_func_name(&self, func: FuncId, args: &[ITypeId]) -> String {
        mangle_name(&self.syms.func(func).name, args, &self.types)
    }

    /// The constructor symbol of a class, if declared.
    pub fn ctor_of(&mut self, class: ClassId) -> Option<FuncId> {
        let scope = self.syms.class(class).class_scope;
        let mut t = TypeTranslator::new();
        self.scopes
            .find_func(scope, CTOR_NAME, RecurseMode::NoRecurse, &mut t)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Ports the bootstrap symbol table: the builtin class hierarchy with its
/// native method symbols.
fn bootstrap_prelude(
    types: &mut TypeArena,
    scopes: &mut ScopeArena,
    syms: &mut Symbols,
    root: ScopeId,
) -> Prelude {
    let mut type_params = |types: &mut TypeArena, any: Option<ITypeId>, n: usize| -> Vec<ITypeId> {
        (0..n)
            .map(|i| {
                let t = types.create_type_param(format!("T{i}"), i, any);
                types.instantiate0(t)
            })
            .collect()
    };

    let any_t = types.create_type("any", None, 0, Vec::new());
    let any = types.instantiate0(any_t);

    let int_t = types.create_type("int", Some(any), 0, Vec::new());
    let bool_t = types.create_type("bool", Some(any), 0, Vec::new());
    let float_t = types.create_type("float", Some(any), 0, Vec::new());
    let void_t = types.create_type("void", Some(any), 0, Vec::new());
    let object_t = types.create_type("object", Some(any), 0, Vec::new());
    let object = types.instantiate0(object_t);

    let string_t = types.create_type("string", Some(object), 0, Vec::new());
    let boxed_int_t = types.create_type("<Int>", Some(object), 0, Vec::new());
    let boxed_float_t = types.create_type("<Float>", Some(object), 0, Vec::new());
    let boxed_bool_t = types.create_type("<Bool>", Some(object), 0, Vec::new());

    let ref_params = type_params(types, Some(any), 1);
    let ref_t = types.create_type("<ref>", Some(object), 1, ref_params.clone());

    let classtype_params = type_params(types, Some(any), 1);
    let classtype_t = types.create_type("classtype", Some(any), 1, classtype_params);

    let moduletype_t = types.create_type("<moduletype>", Some(object), 0, Vec::new());
    let boundless_t = types.create_type("boundless", None, 0, Vec::new());

    let list_params = type_params(types, Some(any), 1);
    let list_t = types.create_type("list", Some(object), 1, list_params.clone());
    let map_params = type_params(types, Some(any), 2);
    let map_t = types.create_type("map", Some(object), 2, map_params.clone());

    let func_t: Vec<TypeId> = (0..20)
        .map(|n| {
            let ps = type_params(types, Some(any), n + 1);
            types.create_type(format!("func{n}"), Some(object), n + 1, ps)
        })
        .collect();

    let int = types.instantiate0(int_t);
    let bool_ = types.instantiate0(bool_t);
    let float = types.instantiate0(float_t);
    let string = types.instantiate0(string_t);
    let void = types.instantiate0(void_t);
    let boxed_int = types.instantiate0(boxed_int_t);
    let boxed_float = types.instantiate0(boxed_float_t);
    let boxed_bool = types.instantiate0(boxed_bool_t);
    let moduletype = types.instantiate0(moduletype_t);
    let boundless = types.instantiate0(boundless_t);

    // helper closures over the arenas for class/method creation; class
    // parent wiring matches Program::create_class_symbol
    let mut make_class = |types: &mut TypeArena,
                          scopes: &mut ScopeArena,
                          syms: &mut Symbols,
                          name: &str,
                          ty: TypeId,
                          tparams: Vec<ITypeId>|
     -> (ClassId, ScopeId) {
        let class_scope = scopes.new_child(root, ScopeOwner::None);
        let id = syms.add_class(ClassSymbol {
            name: name.to_owned(),
            defined_in: root,
            class_scope,
            ty,
            type_params: tparams,
            lifted: None,
            lifter: None,
            specialization: None,
            is_module_class: false,
        });
        types.set_class_sym(ty, id);
        scopes.insert_class(root, name, id);
        scopes.get_mut(class_scope).owner = ScopeOwner::Class(id);
        if let Some(parent) = types.ty(ty).parent {
            let mut t = TypeTranslator::new();
            t.bind(types, parent);
            let parent_base = types.base(parent);
            if let Some(parent_class) = types.ty(parent_base).class_sym {
                let parent_scope = syms.class(parent_class).class_scope;
                scopes.add_class_parent(class_scope, parent, parent_scope, t.map);
            }
        }
        (id, class_scope)
    };

    let mut make_method = |scopes: &mut ScopeArena,
                           syms: &mut Symbols,
                           class: ClassId,
                           class_scope: ScopeId,
                           name: &str,
                           params: Vec<ITypeId>,
                           ret: ITypeId,
                           is_override: bool|
     -> FuncId {
        let inner = scopes.new_child(class_scope, ScopeOwner::None);
        let id = syms.add_func(FuncSymbol {
            name: name.to_owned(),
            defined_in: class_scope,
            inner_scope: inner,
            type_params: Vec::new(),
            params,
            ret,
            native: true,
            owner_class: Some(class),
            is_override,
        });
        scopes.insert_func(class_scope, name, id);
        scopes.get_mut(inner).owner = ScopeOwner::Func(id);
        id
    };

    // primitives and `any` have class symbols but empty scopes
    for (name, ty) in [
        ("any", any_t),
        ("int", int_t),
        ("bool", bool_t),
        ("float", float_t),
        ("void", void_t),
    ] {
        make_class(types, scopes, syms, name, ty, Vec::new());
    }

    let (object_class, object_scope) = make_class(types, scopes, syms, "object", object_t, Vec::new());
    make_method(scopes, syms, object_class, object_scope, CTOR_NAME, vec![], void, false);
    make_method(scopes, syms, object_class, object_scope, "stringify", vec![], string, false);
    make_method(scopes, syms, object_class, object_scope, "hash", vec![], int, false);
    make_method(scopes, syms, object_class, object_scope, "eq", vec![object], bool_, false);

    for n in 0..20 {
        let ty = func_t[n];
        let tparams = types.ty(ty).type_params.clone();
        make_class(types, scopes, syms, &format!("func{n}"), ty, tparams);
    }

    let (string_class, string_scope) = make_class(types, scopes, syms, "string", string_t, Vec::new());
    make_method(scopes, syms, string_class, string_scope, CTOR_NAME, vec![], void, false);
    make_method(scopes, syms, string_class, string_scope, "stringify", vec![], string, true);
    make_method(scopes, syms, string_class, string_scope, "hash", vec![], int, true);
    make_method(scopes, syms, string_class, string_scope, "eq", vec![object], bool_, true);
    make_method(scopes, syms, string_class, string_scope, "concat", vec![string], string, false);
    make_method(scopes, syms, string_class, string_scope, "size", vec![], int, false);

    let (boxed_int_class, s) = make_class(types, scopes, syms, "<Int>", boxed_int_t, Vec::new());
    make_method(scopes, syms, boxed_int_class, s, CTOR_NAME, vec![int], void, false);
    make_method(scopes, syms, boxed_int_class, s, "stringify", vec![], string, true);
    make_method(scopes, syms, boxed_int_class, s, "hash", vec![], int, true);
    make_method(scopes, syms, boxed_int_class, s, "eq", vec![object], bool_, true);

    let (boxed_float_class, s) = make_class(types, scopes, syms, "<Float>", boxed_float_t, Vec::new());
    make_method(scopes, syms, boxed_float_class, s, CTOR_NAME, vec![float], void, false);
    make_method(scopes, syms, boxed_float_class, s, "stringify", vec![], string, true);
    make_method(scopes, syms, boxed_float_class, s, "hash", vec![], int, true);
    make_method(scopes, syms, boxed_float_class, s, "eq", vec![object], bool_, true);

    let (boxed_bool_class, s) = make_class(types, scopes, syms, "<Bool>", boxed_bool_t, Vec::new());
    make_method(scopes, syms, boxed_bool_class, s, CTOR_NAME, vec![bool_], void, false);
    make_method(scopes, syms, boxed_bool_class, s, "stringify", vec![], string, true);
    make_method(scopes, syms, boxed_bool_class, s, "hash", vec![], int, true);
    make_method(scopes, syms, boxed_bool_class, s, "eq", vec![object], bool_, true);

    let (ref_class, ref_scope) = make_class(types, scopes, syms, "<ref>", ref_t, ref_params.clone());
    make_method(scopes, syms, ref_class, ref_scope, CTOR_NAME, vec![], void, false);
    {
        let id = syms.add_var(VarSymbol {
            name: "value".to_owned(),
            defined_in: ref_scope,
            ty: Some(ref_params[0]),
            promote_to_ref: false,
            owner_class: Some(ref_class),
            private: false,
        });
        scopes.insert_var(ref_scope, "value", id);
    }

    {
        let classtype_tparams = types.ty(classtype_t).type_params.clone();
        make_class(types, scopes, syms, "classtype", classtype_t, classtype_tparams);
        make_class(types, scopes, syms, "<moduletype>", moduletype_t, Vec::new());
        make_class(types, scopes, syms, "boundless", boundless_t, Vec::new());
    }

    let (list_class, list_scope) = make_class(types, scopes, syms, "list", list_t, list_params.clone());
    make_method(scopes, syms, list_class, list_scope, CTOR_NAME, vec![], void, false);
    make_method(scopes, syms, list_class, list_scope, "stringify", vec![], string, true);
    make_method(scopes, syms, list_class, list_scope, "hash", vec![], int, true);
    make_method(scopes, syms, list_class, list_scope, "eq", vec![object], bool_, true);
    make_method(scopes, syms, list_class, list_scope, "get", vec![int], list_params[0], false);
    make_method(
        scopes, syms, list_class, list_scope,
        "set",
        vec![int, list_params[0]],
        void,
        false,
    );
    make_method(scopes, syms, list_class, list_scope, "append", vec![list_params[0]], void, false);
    make_method(scopes, syms, list_class, list_scope, "size", vec![], int, false);

    let (map_class, map_scope) = make_class(types, scopes, syms, "map", map_t, map_params.clone());
    make_method(scopes, syms, map_class, map_scope, CTOR_NAME, vec![], void, false);
    make_method(scopes, syms, map_class, map_scope, "stringify", vec![], string, true);
    make_method(scopes, syms, map_class, map_scope, "hash", vec![], int, true);
    make_method(scopes, syms, map_class, map_scope, "eq", vec![object], bool_, true);
    make_method(scopes, syms, map_class, map_scope, "get", vec![map_params[0]], map_params[1], false);
    make_method(
        scopes, syms, map_class, map_scope,
        "set",
        vec![map_params[0], map_params[1]],
        void,
        false,
    );
    make_method(scopes, syms, map_class, map_scope, "size", vec![], int, false);

    // free functions
    let print_func = {
        let inner = scopes.new_child(root, ScopeOwner::None);
        let id = syms.add_func(FuncSymbol {
            name: "print".to_owned(),
            defined_in: root,
            inner_scope: inner,
            type_params: Vec::new(),
            params: vec![any],
            ret: void,
            native: true,
            owner_class: None,
            is_override: false,
        });
        scopes.insert_func(root, "print", id);
        scopes.get_mut(inner).owner = ScopeOwner::Func(id);
        id
    };

    Prelude {
        any_t,
        int_t,
        bool_t,
        float_t,
        string_t,
        void_t,
        object_t,
        boxed_int_t,
        boxed_float_t,
        boxed_bool_t,
        ref_t,
        classtype_t,
        moduletype_t,
        boundless_t,
        list_t,
        map_t,
        func_t,
        any,
        int,
        bool_,
        float,
        string,
        void,
        object,
        boxed_int,
        boxed_float,
        boxed_bool,
        moduletype,
        boundless,
        object_class,
        string_class,
        boxed_int_class,
        boxed_float_class,
        boxed_bool_class,
        ref_class,
        list_class,
        map_class,
        print_func,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_subtyping() {
        let mut p = Program::new();
        let (int, float, any, object, string) = (
            p.prelude.int,
            p.prelude.float,
            p.prelude.any,
            p.prelude.object,
            p.prelude.string,
        );
        assert!(p.types.is_subtype_of(int, any));
        assert!(!p.types.is_subtype_of(int, float));
        assert!(p.types.is_subtype_of(string, object));
        assert!(p.types.is_subtype_of(object, any));
        assert_eq!(p.types.most_common_type(int, float), Some(any));
    }

    #[test]
    fn test_builtin_specialization_on_demand() {
        let mut p = Program::new();
        let int = p.prelude.int;
        let list_t = p.prelude.list_t;
        let list_int = p.types.instantiate(list_t, &[int]);
        let class = p.find_code_generatable_class(list_int).unwrap();
        assert_eq!(p.syms.class(class).name, "list{int}");
        // a second request interns to the same symbol
        let again = p.find_code_generatable_class(list_int).unwrap();
        assert_eq!(class, again);

        // the specialized `get` returns int now
        let layout = p.linearized_order(class);
        let get = layout
            .methods
            .iter()
            .copied()
            .find(|&m| p.syms.func(m).name == "get")
            .unwrap();
        assert_eq!(p.syms.func(get).ret, int);
    }

    #[test]
    fn test_object_vtable_layout_is_parents_first() {
        let mut p = Program::new();
        let int = p.prelude.int;
        let list_t = p.prelude.list_t;
        let list_int = p.types.instantiate(list_t, &[int]);
        let class = p.find_code_generatable_class(list_int).unwrap();
        let layout = p.linearized_order(class);
        let names: Vec<&str> = layout
            .methods
            .iter()
            .map(|&m| p.syms.func(m).name.as_str())
            .collect();
        // object's slots first (overridden in place), then list's own
        assert_eq!(names, ["stringify", "hash", "eq", "get", "set", "append", "size"]);
    }
}
