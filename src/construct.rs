// used to keep the one-to-one mapping between keys and positions
use bimap::{BiMap, Overwritten};
// the ordered key list of an index
use indexmap::IndexSet;

// other keepers use HashSet or HashMap
use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;
use std::ops::Deref;

use crate::datatype::Value;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- RecordId -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    pub fn get(&self) -> u64 {
        self.0
    }
}
impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub const GENESIS: u64 = 0;

#[derive(Debug, Clone)]
pub struct IdGenerator {
    lower_bound: u64,
    retained: HashSet<RecordId, IdHasher>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            retained: HashSet::default(),
        }
    }
    // Identities usually arrive with records bred from another collection,
    // or from a parent feeding one of its derived collections. Retaining them
    // pushes the lower bound so that generated ones never collide.
    pub fn retain(&mut self, id: RecordId) {
        self.retained.insert(id);
        if id.0 > self.lower_bound {
            self.lower_bound = id.0;
        }
    }
    pub fn check(&self, id: RecordId) -> bool {
        self.retained.contains(&id)
    }
    // A released identity is gone for good, the lower bound never decreases.
    pub fn release(&mut self, id: RecordId) {
        self.retained.remove(&id);
    }
    pub fn generate(&mut self) -> RecordId {
        loop {
            self.lower_bound += 1;
            let candidate = RecordId(self.lower_bound);
            if self.retained.insert(candidate) {
                return candidate;
            }
        }
    }
}
impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Record -------------
/// A stored value together with the identity its collection assigned to it.
/// The identity lives beside the value, the value itself is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    value: Value,
}
impl Record {
    pub fn new(id: RecordId, value: Value) -> Self {
        Self { id, value }
    }
    pub fn id(&self) -> RecordId {
        self.id
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }
    pub fn into_value(self) -> Value {
        self.value
    }
}
impl Deref for Record {
    type Target = Value;
    fn deref(&self) -> &Value {
        &self.value
    }
}
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.id, self.value)
    }
}

// ------------- Index -------------
/// A reversible map between keys and positions in a collection, keeping the
/// keys in the order they were added.
#[derive(Debug, Clone)]
pub struct Index<K: Eq + Hash + Clone = String> {
    name: String,
    resolve: BiMap<K, usize>,
    keys: IndexSet<K, OtherHasher>,
}

impl<K: Eq + Hash + Clone> Index<K> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resolve: BiMap::new(),
            keys: IndexSet::default(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Binds `key` to `position`. Either side that was bound before loses its
    /// previous partner, so the index stays one-to-one.
    pub fn add(&mut self, key: K, position: usize) {
        match self.resolve.insert(key.clone(), position) {
            Overwritten::Right(old_key, _) | Overwritten::Pair(old_key, _) => {
                if old_key != key {
                    self.keys.shift_remove(&old_key);
                }
            }
            Overwritten::Both((old_key, _), (other_key, _)) => {
                for k in [old_key, other_key] {
                    if k != key {
                        self.keys.shift_remove(&k);
                    }
                }
            }
            Overwritten::Left(_, _) | Overwritten::Neither => (),
        }
        self.keys.insert(key);
    }
    pub fn get(&self, key: &K) -> Option<usize> {
        self.resolve.get_by_left(key).copied()
    }
    pub fn key_at(&self, position: usize) -> Option<&K> {
        self.resolve.get_by_right(&position)
    }
    pub fn contains(&self, key: &K) -> bool {
        self.resolve.contains_left(key)
    }
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let (_, position) = self.resolve.remove_by_left(key)?;
        self.keys.shift_remove(key);
        Some(position)
    }
    /// Compacts positions after the element at `position` was spliced out of
    /// the collection.
    pub fn shift_after(&mut self, position: usize) {
        let mut moved: Vec<(K, usize)> = self
            .resolve
            .iter()
            .filter(|(_, p)| **p > position)
            .map(|(k, p)| (k.clone(), *p))
            .collect();
        // lowest first, so every target position has already been vacated
        moved.sort_by_key(|(_, p)| *p);
        for (k, p) in moved {
            self.resolve.remove_by_left(&k);
            self.resolve.insert(k, p - 1);
        }
    }
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }
    pub fn positions(&self) -> impl Iterator<Item = (&K, usize)> {
        self.keys
            .iter()
            .filter_map(|k| self.resolve.get_by_left(k).map(|p| (k, *p)))
    }
    pub fn len(&self) -> usize {
        self.resolve.len()
    }
    pub fn is_empty(&self) -> bool {
        self.resolve.is_empty()
    }
    pub fn clear(&mut self) {
        self.resolve.clear();
        self.keys.clear();
    }
}

// ------------- Hashtray -------------
/// Remembers the hash value each record was last filed under, per hash, so a
/// record can be taken out of its former group when its value changes.
#[derive(Debug, Clone, Default)]
pub struct Hashtray {
    resolve: HashMap<String, HashMap<RecordId, String, IdHasher>, OtherHasher>,
}

impl Hashtray {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, hash: &str, id: RecordId) -> Option<&str> {
        self.resolve
            .get(hash)
            .and_then(|tray| tray.get(&id))
            .map(String::as_str)
    }
    pub fn set(&mut self, hash: &str, id: RecordId, value: String) {
        self.resolve
            .entry(hash.to_string())
            .or_default()
            .insert(id, value);
    }
    pub fn remove(&mut self, hash: &str, id: RecordId) -> Option<String> {
        self.resolve.get_mut(hash).and_then(|tray| tray.remove(&id))
    }
    pub fn clear(&mut self) {
        self.resolve.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_never_reused() {
        let mut generator = IdGenerator::new();
        let a = generator.generate();
        let b = generator.generate();
        assert_ne!(a, b);
        generator.release(b);
        let c = generator.generate();
        assert!(c > b);
        assert!(!generator.check(b));
    }

    #[test]
    fn generation_skips_retained_ids() {
        let mut generator = IdGenerator::new();
        generator.retain(RecordId::new(5));
        assert_eq!(generator.generate(), RecordId::new(6));
        assert!(generator.check(RecordId::new(5)));
    }

    #[test]
    fn index_is_one_to_one() {
        let mut index: Index = Index::new("name");
        index.add("a".to_string(), 0);
        index.add("b".to_string(), 1);
        // rebinding position 1 evicts "b"
        index.add("c".to_string(), 1);
        assert_eq!(index.get(&"b".to_string()), None);
        assert_eq!(index.get(&"c".to_string()), Some(1));
        assert_eq!(index.keys().cloned().collect::<Vec<_>>(), vec!["a", "c"]);
        // rebinding key "a" moves it
        index.add("a".to_string(), 2);
        assert_eq!(index.key_at(0), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn index_shift_after_removal() {
        let mut index: Index<RecordId> = Index::new("ids");
        for i in 0..4 {
            index.add(RecordId::new(i + 1), i as usize);
        }
        assert_eq!(index.remove(&RecordId::new(2)), Some(1));
        index.shift_after(1);
        assert_eq!(index.get(&RecordId::new(1)), Some(0));
        assert_eq!(index.get(&RecordId::new(3)), Some(1));
        assert_eq!(index.get(&RecordId::new(4)), Some(2));
    }

    #[test]
    fn hashtray_remembers_last_value() {
        let mut tray = Hashtray::new();
        let id = RecordId::new(1);
        tray.set("group", id, "x".to_string());
        assert_eq!(tray.get("group", id), Some("x"));
        tray.set("group", id, "y".to_string());
        assert_eq!(tray.remove("group", id), Some("y".to_string()));
        assert_eq!(tray.get("group", id), None);
    }
}
