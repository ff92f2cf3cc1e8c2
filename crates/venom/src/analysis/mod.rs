//! Semantic analysis: the type lattice, symbols, scopes, and the
//! two-phase analyzer that runs over a parsed module.

pub mod analyzer;
pub mod context;
pub mod scope;
pub mod symbol;
pub mod types;

/// Defines a `u32`-backed arena handle.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            #[must_use]
            pub fn from_index(idx: usize) -> Self {
                Self(u32::try_from(idx).expect("arena exceeded u32 handles"))
            }
        }
    };
}

pub(crate) use define_id;
