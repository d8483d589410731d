//! Densely numbered entity references, and the primary/secondary maps keyed
//! by them.
//!
//! Every cross-referencing structure in this crate (GP nodes, PP commands,
//! registers, blocks, symbols, ...) is a newtype around a `u32` index rather
//! than a pointer or an `Rc`. This is the arena-of-indices discipline: all
//! inter-node edges (parent sets, dep-graph edges, phi sources) are stored as
//! indices, so deletion and reachability never have to worry about reference
//! cycles, and a whole program can be cloned or dropped without chasing
//! pointers.
//!
//! Ground: `cranelift-entity/src/map.rs`'s `PrimaryMap`, and the
//! `EntityRef`/`entity_impl!` pattern `cranelift-codegen/src/ir/entities.rs`
//! applies to every IR reference type -- kept essentially verbatim.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice;
use std::vec::Vec;

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of a `PrimaryMap` or `SecondaryMap`.
pub trait EntityRef: Copy + Eq + Ord + Hash {
    /// Create a new entity reference from a small integer.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Macro that defines a new `u32`-backed entity reference type implementing
/// `EntityRef`, `Display` and `Debug`.
macro_rules! entity_impl {
    ($entity:ident, $display_prefix:expr) => {
        impl $crate::entity::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::max_value() as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl ::std::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                (self as &dyn ::std::fmt::Display).fmt(f)
            }
        }
    };
    ($entity:ident) => {
        entity_impl!($entity, "");
    };
}

pub(crate) use entity_impl;

/// A mapping `K -> V` that also serves as the owning allocator for `K`.
///
/// Calling `push` both stores `v` and mints a fresh key for it; there is no
/// other way to create a key for this map. This is how every arena in this
/// crate (GP node table, PP command table, register table, block table, ...)
/// is built.
#[derive(Debug, Clone)]
pub struct PrimaryMap<K, V>
where
    K: EntityRef,
{
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K, V> PrimaryMap<K, V>
where
    K: EntityRef,
{
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            unused: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Allocate a new entity and store `v` for it, returning the fresh key.
    pub fn push(&mut self, v: V) -> K {
        let k = K::new(self.elems.len());
        self.elems.push(v);
        k
    }

    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.elems.get_mut(k.index())
    }

    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            iter: self.elems.iter().enumerate(),
            unused: PhantomData,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<K, V> {
        IterMut {
            iter: self.elems.iter_mut().enumerate(),
            unused: PhantomData,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.elems.len()).map(K::new)
    }

    pub fn values(&self) -> slice::Iter<V> {
        self.elems.iter()
    }

    pub fn values_mut(&mut self) -> slice::IterMut<V> {
        self.elems.iter_mut()
    }
}

impl<K, V> Default for PrimaryMap<K, V>
where
    K: EntityRef,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Index<K> for PrimaryMap<K, V>
where
    K: EntityRef,
{
    type Output = V;
    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

impl<K, V> IndexMut<K> for PrimaryMap<K, V>
where
    K: EntityRef,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

pub struct Iter<'a, K, V> {
    iter: std::iter::Enumerate<slice::Iter<'a, V>>,
    unused: PhantomData<K>,
}

impl<'a, K: EntityRef, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(i, v)| (K::new(i), v))
    }
}

pub struct IterMut<'a, K, V> {
    iter: std::iter::Enumerate<slice::IterMut<'a, V>>,
    unused: PhantomData<K>,
}

impl<'a, K: EntityRef, V> Iterator for IterMut<'a, K, V> {
    type Item = (K, &'a mut V);
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(i, v)| (K::new(i), v))
    }
}

/// A mapping `K -> V` for densely indexed entity references that does not
/// own the key space (unlike `PrimaryMap`). Used to attach derived
/// information (liveness sets, scheduling positions, dep-info) to entities
/// owned by some other arena, without bloating the primary struct.
///
/// Untouched entries read as `V::default()` (or a caller-supplied default).
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    pub fn new() -> Self
    where
        V: Default,
    {
        Self {
            elems: Vec::new(),
            default: Default::default(),
            unused: PhantomData,
        }
    }

    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    pub fn clear(&mut self) {
        self.elems.clear();
    }

    pub fn resize(&mut self, n: usize) {
        self.elems.resize(n, self.default.clone());
    }
}

impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    type Output = V;
    fn index(&self, k: K) -> &V {
        self.get(k).unwrap_or(&self.default)
    }
}

impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.resize(i + 1);
        }
        &mut self.elems[i]
    }
}

/// A set of entity references, backed by a hash set. Used where the index
/// space is sparse or where we need set operations rather than map lookups
/// (e.g. a node's parent set, a register's use/def set).
#[derive(Debug, Clone, Default)]
pub struct EntitySet<K: EntityRef + Hash> {
    present: std::collections::HashSet<K>,
}

impl<K: EntityRef + Hash> EntitySet<K> {
    pub fn new() -> Self {
        Self {
            present: std::collections::HashSet::new(),
        }
    }

    pub fn insert(&mut self, k: K) -> bool {
        self.present.insert(k)
    }

    pub fn remove(&mut self, k: K) -> bool {
        self.present.remove(&k)
    }

    pub fn contains(&self, k: K) -> bool {
        self.present.contains(&k)
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.present.iter()
    }
}

impl<K: EntityRef + Hash> fmt::Display for EntitySet<K>
where
    K: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, k) in self.present.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", k)?;
        }
        write!(f, "}}")
    }
}

/// A generic interner-style map from an external handle type to an entity
/// reference, used only during front-end lowering (HIR -> GP IR / PP HIR) and
/// dropped once lowering completes, per the concurrency & resource model.
pub type LoweringMap<H, K> = HashMap<H, K>;
