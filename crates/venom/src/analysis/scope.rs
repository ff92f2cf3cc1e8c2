//! Scopes (symbol tables).
//!
//! A scope has one primary (lexical) parent and zero or more class parents
//! (inheritance). Lookups take a recursion mode and accumulate a type
//! translator: crossing a parameterized class boundary appends that
//! boundary's parameter substitutions, so a member found in `list{T}` via
//! `list{int}` comes back with `T -> int` recorded.

use indexmap::IndexMap;

use crate::{
    analysis::{
        define_id,
        symbol::{ClassId, FuncId, ModuleId, VarId},
        types::{ITypeId, TypeTranslator},
    },
    ast::SymbolRef,
};

define_id!(
    /// Handle to a [`Scope`].
    ScopeId
);

/// How far a lookup walks from the starting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurseMode {
    /// Current scope only.
    NoRecurse,
    /// Current scope, then the lexical chain (class parents included).
    AllowCurrentScope,
    /// The lexical chain, excluding the current scope itself.
    DisallowCurrentScope,
    /// The inheritance chain starting at the current scope; the lexical
    /// parent is not consulted.
    ClassLookup,
    /// The inheritance chain excluding the current scope.
    ClassParents,
}

bitflags::bitflags! {
    /// Which symbol kinds a [`ScopeArena::find_base_symbol`] call considers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymKind: u8 {
        const LOCATION = 1 << 0;
        const FUNCTION = 1 << 1;
        const CLASS    = 1 << 2;
        const MODULE   = 1 << 3;
    }
}

/// What construct opened a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOwner {
    /// The builtin root or another unowned scope.
    None,
    /// A module's top-level statement list.
    Module,
    Class(ClassId),
    Func(FuncId),
    /// An if branch or for body.
    Block,
}

/// A link to an inherited class scope plus the parameter substitutions
/// picked up when crossing it.
#[derive(Debug)]
pub struct ClassParent {
    pub itype: ITypeId,
    pub scope: ScopeId,
    pub type_map: Vec<(ITypeId, ITypeId)>,
}

#[derive(Debug)]
pub struct Scope {
    /// Full name of the module this scope belongs to (`<prelude>` for
    /// builtins).
    pub module: String,
    pub primary_parent: Option<ScopeId>,
    pub class_parents: Vec<ClassParent>,
    pub children: Vec<ScopeId>,
    pub owner: ScopeOwner,
    vars: IndexMap<String, VarId>,
    funcs: IndexMap<String, FuncId>,
    classes: IndexMap<String, ClassId>,
    modules: IndexMap<String, ModuleId>,
}

impl Scope {
    #[must_use]
    pub fn is_class_scope(&self) -> bool {
        matches!(self.owner, ScopeOwner::Class(_))
    }

    #[must_use]
    pub fn is_module_scope(&self) -> bool {
        matches!(self.owner, ScopeOwner::Module)
    }

    /// Value symbols in insertion order; this order is the field layout
    /// contribution of a class scope.
    #[must_use]
    pub fn var_symbols(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars.values().copied()
    }

    #[must_use]
    pub fn func_symbols(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.funcs.values().copied()
    }

    #[must_use]
    pub fn class_symbols(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes.values().copied()
    }
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_root(&mut self, module: impl Into<String>) -> ScopeId {
        self.push(Scope {
            module: module.into(),
            primary_parent: None,
            class_parents: Vec::new(),
            children: Vec::new(),
            owner: ScopeOwner::None,
            vars: IndexMap::new(),
            funcs: IndexMap::new(),
            classes: IndexMap::new(),
            modules: IndexMap::new(),
        })
    }

    pub fn new_child(&mut self, parent: ScopeId, owner: ScopeOwner) -> ScopeId {
        let module = self.scopes[parent.index()].module.clone();
        let id = self.push(Scope {
            module,
            primary_parent: Some(parent),
            class_parents: Vec::new(),
            children: Vec::new(),
            owner,
            vars: IndexMap::new(),
            funcs: IndexMap::new(),
            classes: IndexMap::new(),
            modules: IndexMap::new(),
        });
        self.scopes[parent.index()].children.push(id);
        id
    }

    /// Like [`Self::new_child`] but the child belongs to a different module
    /// (used when a module root scope hangs off the builtin root).
    pub fn new_child_in_module(
        &mut self,
        parent: ScopeId,
        owner: ScopeOwner,
        module: impl Into<String>,
    ) -> ScopeId {
        let id = self.push(Scope {
            module: module.into(),
            primary_parent: Some(parent),
            class_parents: Vec::new(),
            children: Vec::new(),
            owner,
            vars: IndexMap::new(),
            funcs: IndexMap::new(),
            classes: IndexMap::new(),
            modules: IndexMap::new(),
        });
        self.scopes[parent.index()].children.push(id);
        id
    }

    fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId::from_index(self.scopes.len());
        self.scopes.push(scope);
        id
    }

    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    #[must_use]
    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn add_class_parent(
        &mut self,
        scope: ScopeId,
        itype: ITypeId,
        parent_scope: ScopeId,
        type_map: Vec<(ITypeId, ITypeId)>,
    ) {
        self.scopes[scope.index()].class_parents.push(ClassParent {
            itype,
            scope: parent_scope,
            type_map,
        });
    }

    /// Is `ancestor` on the primary-parent chain of `scope` (inclusive)?
    #[must_use]
    pub fn belongs_to(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.get(id).primary_parent;
        }
        false
    }

    /// Number of class scopes crossed walking the primary chain from
    /// `scope` up to (but excluding) `outer`. `outer` must be an ancestor.
    #[must_use]
    pub fn count_class_boundaries(&self, scope: ScopeId, outer: ScopeId) -> usize {
        let mut n = 0;
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if id == outer {
                return n;
            }
            if self.get(id).is_class_scope() {
                n += 1;
            }
            cur = self.get(id).primary_parent;
        }
        panic!("count_class_boundaries: outer scope is not an ancestor");
    }

    /// The nearest enclosing class scope (inclusive), following the primary
    /// chain.
    #[must_use]
    pub fn enclosing_class_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.get(id).is_class_scope() {
                return Some(id);
            }
            cur = self.get(id).primary_parent;
        }
        None
    }

    /// The nearest enclosing function scope (inclusive).
    #[must_use]
    pub fn enclosing_func_scope(&self, scope: ScopeId) -> Option<(ScopeId, FuncId)> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let ScopeOwner::Func(f) = self.get(id).owner {
                return Some((id, f));
            }
            cur = self.get(id).primary_parent;
        }
        None
    }

    /// The module root scope this scope belongs to, if any.
    #[must_use]
    pub fn enclosing_module_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.get(id).is_module_scope() {
                return Some(id);
            }
            cur = self.get(id).primary_parent;
        }
        None
    }

    pub fn insert_var(&mut self, scope: ScopeId, name: &str, id: VarId) {
        let prev = self.get_mut(scope).vars.insert(name.to_owned(), id);
        debug_assert!(prev.is_none(), "duplicate value symbol {name}");
    }

    pub fn insert_func(&mut self, scope: ScopeId, name: &str, id: FuncId) {
        let prev = self.get_mut(scope).funcs.insert(name.to_owned(), id);
        debug_assert!(prev.is_none(), "duplicate function symbol {name}");
    }

    pub fn insert_class(&mut self, scope: ScopeId, name: &str, id: ClassId) {
        let prev = self.get_mut(scope).classes.insert(name.to_owned(), id);
        debug_assert!(prev.is_none(), "duplicate class symbol {name}");
    }

    pub fn insert_module(&mut self, scope: ScopeId, name: &str, id: ModuleId) {
        let prev = self.get_mut(scope).modules.insert(name.to_owned(), id);
        debug_assert!(prev.is_none(), "duplicate module symbol {name}");
    }

    pub fn find_var(
        &self,
        scope: ScopeId,
        name: &str,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
    ) -> Option<VarId> {
        self.find_entry(scope, name, mode, translator, &|s, n| {
            s.vars.get(n).copied()
        })
    }

    pub fn find_func(
        &self,
        scope: ScopeId,
        name: &str,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
    ) -> Option<FuncId> {
        self.find_entry(scope, name, mode, translator, &|s, n| {
            s.funcs.get(n).copied()
        })
    }

    pub fn find_class(
        &self,
        scope: ScopeId,
        name: &str,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
    ) -> Option<ClassId> {
        self.find_entry(scope, name, mode, translator, &|s, n| {
            s.classes.get(n).copied()
        })
    }

    pub fn find_module(&self, scope: ScopeId, name: &str, mode: RecurseMode) -> Option<ModuleId> {
        let mut throwaway = TypeTranslator::new();
        self.find_entry(scope, name, mode, &mut throwaway, &|s, n| {
            s.modules.get(n).copied()
        })
    }

    /// Searches Location, Function, Class, Module containers in that order
    /// and returns the first hit. The first-hit policy across kinds is
    /// documented, not optimal; it is deliberately preserved.
    pub fn find_base_symbol(
        &self,
        scope: ScopeId,
        name: &str,
        kinds: SymKind,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
    ) -> Option<SymbolRef> {
        if kinds.contains(SymKind::LOCATION)
            && let Some(id) = self.find_var(scope, name, mode, translator)
        {
            return Some(SymbolRef::Var(id));
        }
        if kinds.contains(SymKind::FUNCTION)
            && let Some(id) = self.find_func(scope, name, mode, translator)
        {
            return Some(SymbolRef::Func(id));
        }
        if kinds.contains(SymKind::CLASS)
            && let Some(id) = self.find_class(scope, name, mode, translator)
        {
            return Some(SymbolRef::Class(id));
        }
        if kinds.contains(SymKind::MODULE)
            && let Some(id) = self.find_module(scope, name, mode)
        {
            return Some(SymbolRef::Module(id));
        }
        None
    }

    /// Is `sym` reachable by a lookup of its own name starting here?
    #[must_use]
    pub fn can_see(&self, scope: ScopeId, name: &str, sym: SymbolRef) -> bool {
        let mut t = TypeTranslator::new();
        match sym {
            SymbolRef::Var(id) => self
                .find_entry(scope, name, RecurseMode::AllowCurrentScope, &mut t, &|s, n| {
                    s.vars.get(n).copied().filter(|&v| v == id)
                })
                .is_some(),
            SymbolRef::Func(id) => self
                .find_entry(scope, name, RecurseMode::AllowCurrentScope, &mut t, &|s, n| {
                    s.funcs.get(n).copied().filter(|&v| v == id)
                })
                .is_some(),
            SymbolRef::Class(id) => self
                .find_entry(scope, name, RecurseMode::AllowCurrentScope, &mut t, &|s, n| {
                    s.classes.get(n).copied().filter(|&v| v == id)
                })
                .is_some(),
            SymbolRef::Module(id) => self
                .find_entry(scope, name, RecurseMode::AllowCurrentScope, &mut t, &|s, n| {
                    s.modules.get(n).copied().filter(|&v| v == id)
                })
                .is_some(),
        }
    }

    fn find_entry<T: Copy>(
        &self,
        scope: ScopeId,
        name: &str,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
        get: &dyn Fn(&Scope, &str) -> Option<T>,
    ) -> Option<T> {
        match mode {
            RecurseMode::ClassLookup => self.find_rec(
                scope,
                name,
                RecurseMode::AllowCurrentScope,
                translator,
                true,
                false,
                get,
            ),
            RecurseMode::ClassParents => self.find_rec(
                scope,
                name,
                RecurseMode::DisallowCurrentScope,
                translator,
                true,
                false,
                get,
            ),
            m => self.find_rec(scope, name, m, translator, false, false, get),
        }
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the recursive lookup state")]
    fn find_rec<T: Copy>(
        &self,
        scope: ScopeId,
        name: &str,
        mode: RecurseMode,
        translator: &mut TypeTranslator,
        exclude_primary: bool,
        is_parent_scope: bool,
        get: &dyn Fn(&Scope, &str) -> Option<T>,
    ) -> Option<T> {
        let s = self.get(scope);
        if (is_parent_scope || mode != RecurseMode::DisallowCurrentScope)
            && let Some(found) = get(s, name)
        {
            return Some(found);
        }
        if mode == RecurseMode::NoRecurse {
            return None;
        }
        if !exclude_primary
            && let Some(pp) = s.primary_parent
            && let Some(found) = self.find_rec(pp, name, mode, translator, false, true, get)
        {
            return Some(found);
        }
        for cp in &s.class_parents {
            if let Some(found) = self.find_rec(cp.scope, name, mode, translator, true, true, get) {
                translator.extend(&cp.type_map);
                return Some(found);
            }
        }
        None
    }

    /// Parents-first linearization of a class scope's inheritance chain;
    /// the deterministic basis for field slots and vtable indices.
    pub fn linearized_class_order(&self, scope: ScopeId, out: &mut Vec<ScopeId>) {
        for i in 0..self.get(scope).class_parents.len() {
            let parent = self.get(scope).class_parents[i].scope;
            self.linearized_class_order(parent, out);
        }
        out.push(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_lookup_walks_primary_chain() {
        let mut scopes = ScopeArena::new();
        let root = scopes.new_root("<prelude>");
        let child = scopes.new_child(root, ScopeOwner::Block);
        let var = VarId(7);
        scopes.insert_var(root, "x", var);

        let mut t = TypeTranslator::new();
        assert_eq!(
            scopes.find_var(child, "x", RecurseMode::AllowCurrentScope, &mut t),
            Some(var)
        );
        assert_eq!(
            scopes.find_var(child, "x", RecurseMode::NoRecurse, &mut t),
            None
        );
        assert_eq!(
            scopes.find_var(root, "x", RecurseMode::DisallowCurrentScope, &mut t),
            None
        );
    }

    #[test]
    fn test_class_lookup_ignores_lexical_parent() {
        let mut scopes = ScopeArena::new();
        let root = scopes.new_root("<prelude>");
        let class_scope = scopes.new_child(root, ScopeOwner::Class(ClassId(0)));
        scopes.insert_var(root, "x", VarId(1));

        let mut t = TypeTranslator::new();
        assert_eq!(
            scopes.find_var(class_scope, "x", RecurseMode::ClassLookup, &mut t),
            None
        );
    }

    #[test]
    fn test_count_class_boundaries() {
        let mut scopes = ScopeArena::new();
        let root = scopes.new_root("m");
        let c1 = scopes.new_child(root, ScopeOwner::Class(ClassId(0)));
        let f = scopes.new_child(c1, ScopeOwner::Func(FuncId(0)));
        let c2 = scopes.new_child(f, ScopeOwner::Class(ClassId(1)));
        assert_eq!(scopes.count_class_boundaries(c2, root), 2);
        assert_eq!(scopes.count_class_boundaries(f, root), 1);
    }
}
