//! Component-membership bitmasks.
//!
//! A [`ComponentMask`] has bit *i* set when the registry's *i*-th component
//! type is present. Archetypes carry one mask each; a query builds its own
//! mask and matches every archetype whose mask is a superset.

use crate::component::ComponentTypeId;

const WORD_BITS: usize = 64;

/// Growable bit vector backed by `u64` words.
///
/// Trailing zero words are always trimmed, so two masks with the same set
/// bits compare and hash equal regardless of how they were built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask {
    words: Vec<u64>,
}

impl ComponentMask {
    /// An empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mask with the given component bits set.
    pub fn from_ids(ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut mask = Self::new();
        for id in ids {
            mask.set(id);
        }
        mask
    }

    #[inline]
    fn split(id: ComponentTypeId) -> (usize, u64) {
        let bit = id.index();
        (bit / WORD_BITS, 1u64 << (bit % WORD_BITS))
    }

    /// Set the bit for `id`.
    pub fn set(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::split(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= bit;
    }

    /// Clear the bit for `id`.
    pub fn clear(&mut self, id: ComponentTypeId) {
        let (word, bit) = Self::split(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !bit;
        }
        self.trim();
    }

    /// Whether the bit for `id` is set.
    #[inline]
    pub fn has(&self, id: ComponentTypeId) -> bool {
        let (word, bit) = Self::split(id);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// Whether every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: &ComponentMask) -> bool {
        if other.words.len() > self.words.len() {
            return false;
        }
        self.words
            .iter()
            .zip(&other.words)
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    /// Bitwise AND of two masks.
    pub fn and(&self, other: &ComponentMask) -> ComponentMask {
        let mut mask = ComponentMask {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
        };
        mask.trim();
        mask
    }

    /// Whether no bits are set.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over the component ids whose bits are set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let base = word_index * WORD_BITS;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(ComponentTypeId::from_index(base + tz))
            })
        })
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: usize) -> ComponentTypeId {
        ComponentTypeId::from_index(i)
    }

    #[test]
    fn set_and_has_across_words() {
        let mut mask = ComponentMask::new();
        mask.set(id(3));
        mask.set(id(130));
        assert!(mask.has(id(3)));
        assert!(mask.has(id(130)));
        assert!(!mask.has(id(64)));
        assert!(!mask.has(id(10_000)));
        assert_eq!(mask.count(), 2);
    }

    #[test]
    fn superset_test() {
        let archetype = ComponentMask::from_ids([id(0), id(1), id(70)]);
        let query = ComponentMask::from_ids([id(1), id(70)]);
        assert!(archetype.contains_all(&query));
        assert!(!query.contains_all(&archetype));
        assert!(archetype.contains_all(&ComponentMask::new()));

        let wider = ComponentMask::from_ids([id(200)]);
        assert!(!archetype.contains_all(&wider));
    }

    #[test]
    fn clear_trims_so_equality_is_canonical() {
        let mut a = ComponentMask::from_ids([id(1), id(100)]);
        a.clear(id(100));
        let b = ComponentMask::from_ids([id(1)]);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn and_and_iter() {
        let a = ComponentMask::from_ids([id(0), id(5), id(65)]);
        let b = ComponentMask::from_ids([id(5), id(65), id(66)]);
        let both = a.and(&b);
        let ids: Vec<usize> = both.iter().map(|c| c.index()).collect();
        assert_eq!(ids, vec![5, 65]);
        assert!(ComponentMask::from_ids([id(0)]).and(&ComponentMask::from_ids([id(1)])).is_empty());
    }
}
