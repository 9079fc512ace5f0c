//indexer.rs
use crate::tuple::TupleId;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use smallvec::SmallVec;
use std::any::Any;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A single extracted join property, compared by value.
///
/// Implemented for every `Eq + Hash + Debug` type; values of different
/// types are never equal.
pub trait IndexProperty: Debug {
    fn property_any(&self) -> &dyn Any;
    fn eq_property(&self, other: &dyn IndexProperty) -> bool;
    fn hash_property(&self, state: &mut dyn Hasher);
}

impl<T: Eq + Hash + Debug + 'static> IndexProperty for T {
    fn property_any(&self) -> &dyn Any {
        self
    }

    fn eq_property(&self, other: &dyn IndexProperty) -> bool {
        other
            .property_any()
            .downcast_ref::<T>()
            .map_or(false, |o| o == self)
    }

    fn hash_property(&self, mut state: &mut dyn Hasher) {
        std::any::TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// Ordered array of extracted properties, one per equality joiner.
#[derive(Debug, Clone, Default)]
pub struct IndexerKey {
    properties: SmallVec<[Rc<dyn IndexProperty>; 2]>,
}

impl IndexerKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(property: impl IndexProperty + 'static) -> Self {
        Self::new().with(property)
    }

    pub fn with(mut self, property: impl IndexProperty + 'static) -> Self {
        self.properties.push(Rc::new(property));
        self
    }

    pub fn push(&mut self, property: Rc<dyn IndexProperty>) {
        self.properties.push(property);
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl PartialEq for IndexerKey {
    fn eq(&self, other: &Self) -> bool {
        self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .zip(&other.properties)
                .all(|(a, b)| a.eq_property(b.as_ref()))
    }
}

impl Eq for IndexerKey {}

impl Hash for IndexerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.properties.len());
        for property in &self.properties {
            property.hash_property(state);
        }
    }
}

/// Multimap from key to the tuples stored under it, for one join side.
#[derive(Debug, Default)]
pub struct Indexer {
    map: HashMap<IndexerKey, HashSet<TupleId>>,
    size: usize,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: IndexerKey, id: TupleId) {
        if self.map.entry(key).or_default().insert(id) {
            self.size += 1;
        }
    }

    /// Removes `id` from the bucket of `key`; empty buckets are dropped.
    pub fn remove(&mut self, key: &IndexerKey, id: TupleId) -> bool {
        let Some(bucket) = self.map.get_mut(key) else {
            return false;
        };
        let removed = bucket.remove(&id);
        if bucket.is_empty() {
            self.map.remove(key);
        }
        if removed {
            self.size -= 1;
        }
        removed
    }

    /// Tuples stored under `key`; a miss is empty.
    pub fn matches<'a>(&'a self, key: &IndexerKey) -> impl Iterator<Item = TupleId> + 'a {
        self.map.get(key).into_iter().flat_map(|bucket| bucket.iter().copied())
    }

    pub fn contains(&self, key: &IndexerKey, id: TupleId) -> bool {
        self.map.get(key).map_or(false, |bucket| bucket.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use generational_arena::Arena;

    #[test]
    fn test_key_equality_is_deep_and_typed() {
        assert_eq!(IndexerKey::of(3i64).with("a"), IndexerKey::of(3i64).with("a"));
        assert_ne!(IndexerKey::of(3i64), IndexerKey::of(3i32));
        assert_ne!(IndexerKey::of(3i64), IndexerKey::of(3i64).with(1u8));
        assert_eq!(IndexerKey::new(), IndexerKey::new());
    }

    #[test]
    fn test_put_remove_and_miss() {
        let mut arena = Arena::new();
        let a = arena.insert(());
        let b = arena.insert(());
        let mut indexer = Indexer::new();

        indexer.put(IndexerKey::of(1i64), a);
        indexer.put(IndexerKey::of(1i64), b);
        assert_eq!(indexer.matches(&IndexerKey::of(1i64)).count(), 2);
        assert_eq!(indexer.matches(&IndexerKey::of(2i64)).count(), 0);

        assert!(indexer.remove(&IndexerKey::of(1i64), a));
        assert!(!indexer.remove(&IndexerKey::of(1i64), a));
        assert!(indexer.remove(&IndexerKey::of(1i64), b));
        assert!(indexer.is_empty());
        assert_eq!(indexer.key_count(), 0);
    }
}
