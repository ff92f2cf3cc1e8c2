//! Symbols: values, class attributes, functions, methods, classes, and
//! modules, stored in per-kind arenas addressed by handle.

use crate::analysis::{
    define_id,
    scope::ScopeId,
    types::{ITypeId, TypeArena, TypeId},
};

define_id!(
    /// Handle to a value symbol (local, parameter, or class attribute).
    VarId
);
define_id!(
    /// Handle to a function or method symbol.
    FuncId
);
define_id!(
    /// Handle to a class symbol.
    ClassId
);
define_id!(
    /// Handle to a module symbol.
    ModuleId
);

/// The constructor method name; also the name looked up when a class is
/// invoked as a function.
pub const CTOR_NAME: &str = "<ctor>";

/// The synthetic function holding a module's top-level statements.
pub const MAIN_NAME: &str = "<main>";

/// The hidden field a lifted nested class uses to reach its enclosing
/// instance.
pub const OUTER_NAME: &str = "<outer>";

/// A value symbol. Class attributes are value symbols with an owning class.
#[derive(Debug)]
pub struct VarSymbol {
    pub name: String,
    pub defined_in: ScopeId,
    /// Unknown until first assignment for implicitly declared variables.
    pub ty: Option<ITypeId>,
    /// Set during lifting when the variable is captured by a nested
    /// function or class; reads and writes then go through a ref cell.
    pub promote_to_ref: bool,
    pub owner_class: Option<ClassId>,
    pub private: bool,
}

impl VarSymbol {
    #[must_use]
    pub fn is_object_field(&self) -> bool {
        self.owner_class.is_some()
    }
}

/// A function symbol. Methods are function symbols with an owning class.
#[derive(Debug)]
pub struct FuncSymbol {
    pub name: String,
    pub defined_in: ScopeId,
    /// The scope holding parameters and body locals.
    pub inner_scope: ScopeId,
    pub type_params: Vec<ITypeId>,
    pub params: Vec<ITypeId>,
    pub ret: ITypeId,
    pub native: bool,
    pub owner_class: Option<ClassId>,
    pub is_override: bool,
}

impl FuncSymbol {
    #[must_use]
    pub fn is_method(&self) -> bool {
        self.owner_class.is_some()
    }

    #[must_use]
    pub fn is_ctor(&self) -> bool {
        self.name == CTOR_NAME && self.is_method()
    }
}

/// A class symbol.
#[derive(Debug)]
pub struct ClassSymbol {
    pub name: String,
    pub defined_in: ScopeId,
    pub class_scope: ScopeId,
    pub ty: TypeId,
    pub type_params: Vec<ITypeId>,
    /// This class has been replaced by a lifted top-level clone.
    pub lifted: Option<ClassId>,
    /// This class was produced by lifting another.
    pub lifter: Option<ClassId>,
    /// For specialized class symbols: the fully-instantiated type realized.
    pub specialization: Option<ITypeId>,
    /// Module-singleton classes have no constructor or vtable of their own.
    pub is_module_class: bool,
}

/// A module symbol: the handle an `import` installs at the import site.
#[derive(Debug)]
pub struct ModuleSymbol {
    pub name: String,
    pub defined_in: ScopeId,
    pub module_scope: ScopeId,
    pub module_class: ClassId,
    /// The module that performed the import; transitive imports are not
    /// visible from other modules.
    pub origin_module: String,
}

/// The per-kind symbol arenas.
#[derive(Debug, Default)]
pub struct Symbols {
    pub vars: Vec<VarSymbol>,
    pub funcs: Vec<FuncSymbol>,
    pub classes: Vec<ClassSymbol>,
    pub modules: Vec<ModuleSymbol>,
}

impl Symbols {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, sym: VarSymbol) -> VarId {
        let id = VarId::from_index(self.vars.len());
        self.vars.push(sym);
        id
    }

    pub fn add_func(&mut self, sym: FuncSymbol) -> FuncId {
        let id = FuncId::from_index(self.funcs.len());
        self.funcs.push(sym);
        id
    }

    pub fn add_class(&mut self, sym: ClassSymbol) -> ClassId {
        let id = ClassId::from_index(self.classes.len());
        self.classes.push(sym);
        id
    }

    pub fn add_module(&mut self, sym: ModuleSymbol) -> ModuleId {
        let id = ModuleId::from_index(self.modules.len());
        self.modules.push(sym);
        id
    }

    #[must_use]
    pub fn var(&self, id: VarId) -> &VarSymbol {
        &self.vars[id.index()]
    }

    #[must_use]
    pub fn var_mut(&mut self, id: VarId) -> &mut VarSymbol {
        &mut self.vars[id.index()]
    }

    #[must_use]
    pub fn func(&self, id: FuncId) -> &FuncSymbol {
        &self.funcs[id.index()]
    }

    #[must_use]
    pub fn func_mut(&mut self, id: FuncId) -> &mut FuncSymbol {
        &mut self.funcs[id.index()]
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> &ClassSymbol {
        &self.classes[id.index()]
    }

    #[must_use]
    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassSymbol {
        &mut self.classes[id.index()]
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> &ModuleSymbol {
        &self.modules[id.index()]
    }

    /// Follows the lifted chain to the replacement class, if any.
    #[must_use]
    pub fn follow_lifted_chain(&self, mut id: ClassId) -> ClassId {
        while let Some(next) = self.class(id).lifted {
            id = next;
        }
        id
    }
}

/// A function symbol applied to a type-argument tuple; the unit the
/// specialization pass monomorphizes over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundFunction {
    pub func: FuncId,
    pub type_args: Vec<ITypeId>,
}

impl BoundFunction {
    #[must_use]
    pub fn new(func: FuncId, type_args: Vec<ITypeId>) -> Self {
        Self { func, type_args }
    }

    /// The canonical mangled name monomorphized instances are registered
    /// under: `name{T1,T2,...}`, or the plain name when not parameterized.
    #[must_use]
    pub fn mangled_name(&self, syms: &Symbols, arena: &TypeArena) -> String {
        mangle_name(&syms.func(self.func).name, &self.type_args, arena)
    }
}

/// `name{a,b,...}`, or `name` for an empty argument list.
#[must_use]
pub fn mangle_name(name: &str, type_args: &[ITypeId], arena: &TypeArena) -> String {
    if type_args.is_empty() {
        return name.to_owned();
    }
    let mut buf = String::from(name);
    buf.push('{');
    for (i, &a) in type_args.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        buf.push_str(&arena.stringify(a));
    }
    buf.push('}');
    buf
}
