//! Ordered multi-map.
//!
//! Keys iterate in ascending order; values under one key keep insertion
//! order. The match tables need per-key and per-pair multiplicity queries,
//! which plain `BTreeMap<K, V>` cannot express.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiMap<K: Ord, V> {
    inner: BTreeMap<K, Vec<V>>,
    len: usize,
}

impl<K: Ord, V> MultiMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.inner.entry(key).or_default().push(value);
        self.len += 1;
    }

    /// Total number of (key, value) pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct keys.
    pub fn num_keys(&self) -> usize {
        self.inner.len()
    }

    /// Values stored under `key`, in insertion order.
    pub fn get(&self, key: &K) -> &[V] {
        self.inner.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Multiplicity of `key`.
    pub fn count_key(&self, key: &K) -> usize {
        self.inner.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// First value inserted under `key`, if any.
    pub fn first(&self, key: &K) -> Option<&V> {
        self.inner.get(key).and_then(|v| v.first())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Flattened (key, value) pairs, keys ascending.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k, v)))
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.len = 0;
    }
}

impl<K: Ord, V: PartialEq> MultiMap<K, V> {
    /// Multiplicity of the exact (key, value) pair.
    pub fn count_pair(&self, key: &K, value: &V) -> usize {
        self.inner
            .get(key)
            .map(|vs| vs.iter().filter(|v| *v == value).count())
            .unwrap_or(0)
    }
}
