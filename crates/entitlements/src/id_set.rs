//! Insertion-ordered identifier set.
//!
//! Records are displayed in the order modules were granted, so the set keeps
//! insertion order while refusing duplicates. Sizes are small (tens of ids), so
//! membership is a linear scan.

use serde::{Deserialize, Serialize};

use modgate_core::{ModuleId, UserId};

/// Ordered, duplicate-free collection of identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<T>",
    into = "Vec<T>",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct IdSet<T: Clone + PartialEq>(Vec<T>);

pub type ModuleSet = IdSet<ModuleId>;
pub type UserSet = IdSet<UserId>;

impl<T: Clone + PartialEq> Default for IdSet<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Clone + PartialEq> IdSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &T) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Add one id. Returns `false` if it was already present.
    pub fn insert(&mut self, id: T) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    /// Remove one id. Returns `false` if it was not present.
    pub fn remove(&mut self, id: &T) -> bool {
        let before = self.0.len();
        self.0.retain(|x| x != id);
        self.0.len() != before
    }

    /// Swap `old` for `new` at the same position.
    ///
    /// Returns `false` (and leaves the set untouched) when `old` is absent. If
    /// `new` already sits elsewhere in the set, that other copy is dropped.
    pub fn replace(&mut self, old: &T, new: T) -> bool {
        let Some(pos) = self.0.iter().position(|x| x == old) else {
            return false;
        };
        self.0[pos] = new.clone();
        let mut seen = false;
        self.0.retain(|x| {
            if *x != new {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });
        true
    }

    /// Union in place (add-to-set). Returns the number of ids actually added.
    pub fn extend_unique<I: IntoIterator<Item = T>>(&mut self, ids: I) -> usize {
        ids.into_iter().filter(|id| self.insert(id.clone())).count()
    }

    /// Remove every id present in `ids`. Returns the number removed.
    pub fn remove_all(&mut self, ids: &[T]) -> usize {
        let before = self.0.len();
        self.0.retain(|x| !ids.contains(x));
        before - self.0.len()
    }

    pub fn intersects(&self, other: &[T]) -> bool {
        self.0.iter().any(|x| other.contains(x))
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T: Clone + PartialEq> From<Vec<T>> for IdSet<T> {
    /// Builds a set from arbitrary input, keeping the first occurrence of each id.
    fn from(value: Vec<T>) -> Self {
        let mut set = Self::new();
        set.extend_unique(value);
        set
    }
}

impl<T: Clone + PartialEq> From<IdSet<T>> for Vec<T> {
    fn from(value: IdSet<T>) -> Self {
        value.0
    }
}

impl<T: Clone + PartialEq> FromIterator<T> for IdSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend_unique(iter);
        set
    }
}

impl<'a, T: Clone + PartialEq> IntoIterator for &'a IdSet<T> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn m(n: u128) -> ModuleId {
        ModuleId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn from_vec_drops_duplicates_keeping_first_position() {
        let set = ModuleSet::from(vec![m(2), m(1), m(2), m(3), m(1)]);
        assert_eq!(set.as_slice(), &[m(2), m(1), m(3)]);
    }

    #[test]
    fn insert_reports_duplicates() {
        let mut set = ModuleSet::new();
        assert!(set.insert(m(1)));
        assert!(!set.insert(m(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn replace_keeps_position_and_dedupes() {
        let mut set = ModuleSet::from(vec![m(1), m(2), m(3)]);
        assert!(set.replace(&m(2), m(9)));
        assert_eq!(set.as_slice(), &[m(1), m(9), m(3)]);

        assert!(set.replace(&m(1), m(3)));
        assert_eq!(set.as_slice(), &[m(3), m(9)]);

        assert!(!set.replace(&m(42), m(5)));
        assert_eq!(set.as_slice(), &[m(3), m(9)]);
    }

    #[test]
    fn deserializing_a_list_with_duplicates_yields_a_set() {
        let a = Uuid::from_u128(1).to_string();
        let json = format!(r#"["{a}","{a}"]"#);
        let set: ModuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set.len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn ids() -> impl Strategy<Value = Vec<ModuleId>> {
            prop::collection::vec((0u128..16).prop_map(m), 0..24)
        }

        fn has_no_duplicates(set: &ModuleSet) -> bool {
            let s = set.as_slice();
            s.iter().enumerate().all(|(i, x)| !s[i + 1..].contains(x))
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any sequence of add-to-set operations leaves no duplicates.
            #[test]
            fn add_to_set_never_duplicates(start in ids(), batches in prop::collection::vec(ids(), 0..6)) {
                let mut set = ModuleSet::from(start);
                for batch in batches {
                    set.extend_unique(batch);
                    prop_assert!(has_no_duplicates(&set));
                }
            }

            /// Property: union is idempotent.
            #[test]
            fn union_is_idempotent(start in ids(), batch in ids()) {
                let mut once = ModuleSet::from(start);
                once.extend_unique(batch.clone());
                let mut twice = once.clone();
                let added = twice.extend_unique(batch);
                prop_assert_eq!(added, 0);
                prop_assert_eq!(once, twice);
            }

            /// Property: pulling {A, B} removes exactly A and B, keeping the rest in order.
            #[test]
            fn remove_all_removes_exactly_the_given_ids(start in ids(), a in 0u128..16, b in 0u128..16) {
                let mut set = ModuleSet::from(start);
                let expected: Vec<ModuleId> = set
                    .iter()
                    .copied()
                    .filter(|x| *x != m(a) && *x != m(b))
                    .collect();
                set.remove_all(&[m(a), m(b)]);
                prop_assert_eq!(set.as_slice(), expected.as_slice());
            }
        }
    }
}
