//! The type lattice.
//!
//! A [`Type`] is a named node with a parent link and an arity; an
//! [`InstantiatedType`] applies a type to concrete arguments. Instantiated
//! types are interned in the arena, so handle equality is structural
//! equality. Subtyping is nominal along the parent chain with invariant
//! parameters.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::analysis::{define_id, symbol::ClassId};

define_id!(
    /// Handle to a [`Type`] in the arena.
    TypeId
);
define_id!(
    /// Handle to an interned [`InstantiatedType`].
    ITypeId
);

pub type ITypeVec = SmallVec<[ITypeId; 2]>;

/// A named type constructor.
///
/// The two lattice roots (`any` above, `boundless` below) have no parent.
/// A type parameter is a `Type` whose identity is its name plus positional
/// index, visible only inside the scope that introduced it.
#[derive(Debug)]
pub struct Type {
    pub name: String,
    /// Parent as an instantiated type over this type's own parameters.
    pub parent: Option<ITypeId>,
    pub arity: usize,
    /// The type-parameter placeholders of this type's declaration, in
    /// positional order. Empty iff `arity == 0`.
    pub type_params: Vec<ITypeId>,
    /// Back-link to the class symbol realizing this type, once known.
    pub class_sym: Option<ClassId>,
    /// `Some(pos)` iff this is a type parameter placeholder.
    pub param_pos: Option<usize>,
}

/// A type applied to `arity` arguments. Interned: two structurally equal
/// instantiations share one handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstantiatedType {
    pub base: TypeId,
    pub params: ITypeVec,
}

/// Owning arena for types and interned instantiated types.
#[derive(Debug, Default)]
pub struct TypeArena {
    types: Vec<Type>,
    itypes: Vec<InstantiatedType>,
    intern: AHashMap<InstantiatedType, ITypeId>,
}

impl TypeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_type(
        &mut self,
        name: impl Into<String>,
        parent: Option<ITypeId>,
        arity: usize,
        type_params: Vec<ITypeId>,
    ) -> TypeId {
        debug_assert_eq!(arity, type_params.len());
        let id = TypeId::from_index(self.types.len());
        self.types.push(Type {
            name: name.into(),
            parent,
            arity,
            type_params,
            class_sym: None,
            param_pos: None,
        });
        id
    }

    /// Creates a type-parameter placeholder with positional identity.
    pub fn create_type_param(
        &mut self,
        name: impl Into<String>,
        pos: usize,
        any: Option<ITypeId>,
    ) -> TypeId {
        let id = TypeId::from_index(self.types.len());
        self.types.push(Type {
            name: name.into(),
            parent: any,
            arity: 0,
            type_params: Vec::new(),
            class_sym: None,
            param_pos: Some(pos),
        });
        id
    }

    #[inline]
    #[must_use]
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn set_class_sym(&mut self, id: TypeId, sym: ClassId) {
        self.types[id.index()].class_sym = Some(sym);
    }

    #[inline]
    #[must_use]
    pub fn itype(&self, id: ITypeId) -> &InstantiatedType {
        &self.itypes[id.index()]
    }

    #[inline]
    #[must_use]
    pub fn base(&self, id: ITypeId) -> TypeId {
        self.itypes[id.index()].base
    }

    #[inline]
    #[must_use]
    pub fn base_ty(&self, id: ITypeId) -> &Type {
        self.ty(self.base(id))
    }

    #[inline]
    #[must_use]
    pub fn params(&self, id: ITypeId) -> &[ITypeId] {
        &self.itypes[id.index()].params
    }

    /// Interns `base{params...}`. The argument count must match the arity.
    pub fn instantiate(&mut self, base: TypeId, params: &[ITypeId]) -> ITypeId {
        assert_eq!(
            self.ty(base).arity,
            params.len(),
            "wrong number of type arguments for {}",
            self.ty(base).name
        );
        let key = InstantiatedType {
            base,
            params: params.iter().copied().collect(),
        };
        if let Some(&found) = self.intern.get(&key) {
            return found;
        }
        let id = ITypeId::from_index(self.itypes.len());
        self.itypes.push(key.clone());
        self.intern.insert(key, id);
        id
    }

    pub fn instantiate0(&mut self, base: TypeId) -> ITypeId {
        self.instantiate(base, &[])
    }

    /// Instantiates a type over its own parameter placeholders
    /// (the "self type" of a parameterized declaration).
    pub fn self_type(&mut self, base: TypeId) -> ITypeId {
        let params: ITypeVec = self.ty(base).type_params.iter().copied().collect();
        self.instantiate(base, &params)
    }

    /// True iff no type-parameter placeholder appears anywhere in the tree.
    #[must_use]
    pub fn is_fully_instantiated(&self, id: ITypeId) -> bool {
        let it = self.itype(id);
        if self.ty(it.base).param_pos.is_some() {
            return false;
        }
        it.params
            .iter()
            .all(|&p| self.is_fully_instantiated(p))
    }

    /// The parent of `id` with this instantiation's arguments substituted
    /// for the declaration's placeholders.
    #[must_use = "parent lookup has no side effects"]
    pub fn parent_of(&mut self, id: ITypeId) -> Option<ITypeId> {
        let base = self.base(id);
        let parent = self.ty(base).parent?;
        let lhs = self.ty(base).type_params.clone();
        let rhs: Vec<ITypeId> = self.params(id).to_vec();
        if lhs.is_empty() {
            return Some(parent);
        }
        let mut tr = TypeTranslator::default();
        tr.bind_pairs(&lhs, &rhs);
        Some(tr.translate(self, parent))
    }

    /// `a <: b`. Identity, the `boundless` bottom, and the nominal parent
    /// chain; parameters are invariant (they only match via interning).
    #[must_use = "subtype check has no side effects"]
    pub fn is_subtype_of(&mut self, a: ITypeId, b: ITypeId) -> bool {
        if a == b {
            return true;
        }
        if self.base_ty(a).name == "boundless" && self.base_ty(a).parent.is_none() {
            return true;
        }
        let mut cur = a;
        while let Some(parent) = self.parent_of(cur) {
            if parent == b {
                return true;
            }
            cur = parent;
        }
        false
    }

    /// The deepest common ancestor of `a` and `b`.
    #[must_use = "common-type lookup has no side effects"]
    pub fn most_common_type(&mut self, a: ITypeId, b: ITypeId) -> Option<ITypeId> {
        let mut a_chain = vec![a];
        let mut cur = a;
        while let Some(p) = self.parent_of(cur) {
            a_chain.push(p);
            cur = p;
        }
        let mut cur = b;
        loop {
            if a_chain.contains(&cur) {
                return Some(cur);
            }
            match self.parent_of(cur) {
                Some(p) => cur = p,
                None => return None,
            }
        }
    }

    /// `name` for arity-0 instantiations, `name{arg,...}` otherwise.
    /// This is also the mangled class name monomorphized instances are
    /// registered under.
    #[must_use]
    pub fn stringify(&self, id: ITypeId) -> String {
        let it = self.itype(id);
        let mut buf = self.ty(it.base).name.clone();
        if !it.params.is_empty() {
            buf.push('{');
            for (i, &p) in it.params.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&self.stringify(p));
            }
            buf.push('}');
        }
        buf
    }
}

/// An ordered list of substitutions over instantiated types, composed while
/// crossing parameterized class boundaries during symbol lookup.
#[derive(Debug, Clone, Default)]
pub struct TypeTranslator {
    pub map: Vec<(ITypeId, ITypeId)>,
}

impl TypeTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, from: ITypeId, to: ITypeId) {
        self.map.push((from, to));
    }

    pub fn extend(&mut self, pairs: &[(ITypeId, ITypeId)]) {
        self.map.extend_from_slice(pairs);
    }

    /// Adds `(lhs_i -> rhs_i)` for every differing pair.
    pub fn bind_pairs(&mut self, lhs: &[ITypeId], rhs: &[ITypeId]) {
        assert_eq!(lhs.len(), rhs.len());
        for (&l, &r) in lhs.iter().zip(rhs) {
            if l != r {
                self.map.push((l, r));
            }
        }
    }

    /// Binds the placeholders of `it`'s declaration to `it`'s arguments.
    pub fn bind(&mut self, arena: &TypeArena, it: ITypeId) {
        let lhs = arena.ty(arena.base(it)).type_params.clone();
        let rhs: Vec<ITypeId> = arena.params(it).to_vec();
        self.bind_pairs(&lhs, &rhs);
    }

    /// Applies the substitutions to fixed point.
    pub fn translate(&self, arena: &mut TypeArena, t: ITypeId) -> ITypeId {
        let mut changed = false;
        let mut ret = self.translate_once(arena, t, &mut changed);
        while changed {
            changed = false;
            ret = self.translate_once(arena, ret, &mut changed);
        }
        ret
    }

    fn translate_once(&self, arena: &mut TypeArena, t: ITypeId, changed: &mut bool) -> ITypeId {
        if let Some(&(_, to)) = self.map.iter().find(|&&(from, _)| from == t) {
            *changed = true;
            return to;
        }
        let params: Vec<ITypeId> = arena.params(t).to_vec();
        if params.is_empty() {
            return t;
        }
        let new_params: Vec<ITypeId> = params
            .iter()
            .map(|&p| self.translate_once(arena, p, changed))
            .collect();
        if *changed {
            arena.instantiate(arena.base(t), &new_params)
        } else {
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_lattice() -> (TypeArena, ITypeId, ITypeId, ITypeId) {
        let mut arena = TypeArena::new();
        let any = arena.create_type("any", None, 0, Vec::new());
        let any_it = arena.instantiate0(any);
        let obj = arena.create_type("object", Some(any_it), 0, Vec::new());
        let obj_it = arena.instantiate0(obj);
        let int = arena.create_type("int", Some(any_it), 0, Vec::new());
        let int_it = arena.instantiate0(int);
        (arena, any_it, obj_it, int_it)
    }

    #[test]
    fn test_interning_gives_structural_equality() {
        let (mut arena, any_it, _, int_it) = tiny_lattice();
        let list = {
            let tp = arena.create_type_param("T0", 0, Some(any_it));
            let tp_it = arena.instantiate0(tp);
            arena.create_type("list", Some(any_it), 1, vec![tp_it])
        };
        let a = arena.instantiate(list, &[int_it]);
        let b = arena.instantiate(list, &[int_it]);
        assert_eq!(a, b);
        assert_eq!(arena.stringify(a), "list{int}");
    }

    #[test]
    fn test_subtyping_is_reflexive_and_walks_parents() {
        let (mut arena, any_it, obj_it, int_it) = tiny_lattice();
        assert!(arena.is_subtype_of(int_it, int_it));
        assert!(arena.is_subtype_of(int_it, any_it));
        assert!(arena.is_subtype_of(obj_it, any_it));
        assert!(!arena.is_subtype_of(int_it, obj_it));
        assert!(!arena.is_subtype_of(any_it, int_it));
    }

    #[test]
    fn test_most_common_type_is_commutative() {
        let (mut arena, any_it, obj_it, int_it) = tiny_lattice();
        assert_eq!(arena.most_common_type(int_it, obj_it), Some(any_it));
        assert_eq!(arena.most_common_type(obj_it, int_it), Some(any_it));
        assert_eq!(arena.most_common_type(obj_it, obj_it), Some(obj_it));
    }

    #[test]
    fn test_translate_is_idempotent() {
        let (mut arena, any_it, _, int_it) = tiny_lattice();
        let tp = arena.create_type_param("T0", 0, Some(any_it));
        let tp_it = arena.instantiate0(tp);
        let list = arena.create_type("list", Some(any_it), 1, vec![tp_it]);
        let generic = arena.instantiate(list, &[tp_it]);

        let mut tr = TypeTranslator::new();
        tr.add(tp_it, int_it);
        let once = tr.translate(&mut arena, generic);
        let twice = tr.translate(&mut arena, once);
        assert_eq!(once, twice);
        assert_eq!(arena.stringify(once), "list{int}");
    }
}
