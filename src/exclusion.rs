// src/exclusion.rs - FoodSet and Exclusion identity types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type FoodId = i64;

/// An ordered (by id) tuple of exactly N distinct food ids: the identity key
/// for a solution shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FoodSet(Vec<FoodId>);

impl FoodSet {
    /// Builds a FoodSet from an arbitrary collection of ids, sorting and
    /// deduplicating. Panics if the caller passes duplicate ids, since a
    /// FoodSet's identity depends on its ids being distinct.
    pub fn from_ids(ids: impl IntoIterator<Item = FoodId>) -> Self {
        let mut v: Vec<FoodId> = ids.into_iter().collect();
        v.sort_unstable();
        let before = v.len();
        v.dedup();
        assert_eq!(before, v.len(), "FoodSet ids must be distinct");
        Self(v)
    }

    pub fn ids(&self) -> &[FoodId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: FoodId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Canonical string key, used as the sqlite primary key: ids in
    /// ascending order joined with commas.
    pub fn canonical_key(&self) -> String {
        self.0
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn from_canonical_key(key: &str) -> Self {
        if key.is_empty() {
            return Self(Vec::new());
        }
        let v = key
            .split(',')
            .map(|s| s.parse::<FoodId>().expect("malformed FoodSet key"))
            .collect();
        Self(v)
    }
}

impl fmt::Display for FoodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.canonical_key())
    }
}

/// A possibly-empty sorted sequence of food ids: "solve the problem over the
/// catalog minus these foods". Identity is the sequence itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Exclusion(Vec<FoodId>);

impl Exclusion {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_ids(ids: impl IntoIterator<Item = FoodId>) -> Self {
        let mut v: Vec<FoodId> = ids.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Self(v)
    }

    pub fn ids(&self) -> &[FoodId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: FoodId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn canonical_key(&self) -> String {
        self.0
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn from_canonical_key(key: &str) -> Self {
        if key.is_empty() {
            return Self(Vec::new());
        }
        let v = key
            .split(',')
            .map(|s| s.parse::<FoodId>().expect("malformed Exclusion key"))
            .collect();
        Self(v)
    }
}

/// Every subset of `universe`, as Exclusions, including the empty one.
/// `universe` is expected to be small (bounded by `|foods_seen|`); this is an
/// exhaustive 2^k enumeration exactly as spec.md describes for queue
/// expansion, not an approximation.
pub fn all_subsets(universe: &BTreeSet<FoodId>) -> Vec<Exclusion> {
    let items: Vec<FoodId> = universe.iter().copied().collect();
    let n = items.len();
    let mut out = Vec::with_capacity(1usize << n.min(20));
    for mask in 0u64..(1u64 << n) {
        let mut subset = Vec::new();
        for (i, id) in items.iter().enumerate() {
            if mask & (1 << i) != 0 {
                subset.push(*id);
            }
        }
        out.push(Exclusion::from_ids(subset));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foodset_canonical_key_is_sorted() {
        let fs = FoodSet::from_ids(vec![3, 1, 2]);
        assert_eq!(fs.canonical_key(), "1,2,3");
    }

    #[test]
    fn foodset_roundtrips_through_canonical_key() {
        let fs = FoodSet::from_ids(vec![5, 2, 9]);
        let back = FoodSet::from_canonical_key(&fs.canonical_key());
        assert_eq!(fs, back);
    }

    #[test]
    fn exclusion_empty_roundtrips() {
        let ex = Exclusion::empty();
        assert_eq!(ex.canonical_key(), "");
        assert_eq!(Exclusion::from_canonical_key(""), ex);
    }

    #[test]
    fn all_subsets_of_five_elements_has_32_entries_each_unique() {
        let universe: BTreeSet<FoodId> = [1, 2, 3, 4, 5].into_iter().collect();
        let subsets = all_subsets(&universe);
        assert_eq!(subsets.len(), 32);
        let unique: BTreeSet<_> = subsets.iter().map(Exclusion::canonical_key).collect();
        assert_eq!(unique.len(), 32);
        assert!(subsets.iter().any(Exclusion::is_empty));
    }
}
