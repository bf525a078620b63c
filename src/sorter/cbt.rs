//! Complete binary tournament tree over particle event lists.
//!
//! Leaves hold slot indices `1..=N`; every internal node holds the slot of the
//! earlier of its two children, so `tree[1]` is the globally earliest slot.
//! Slot `0` is reserved as the "nothing" marker.

use super::pel::Pel;

/// Anything the tree can rank.
pub(crate) trait TournamentKey {
    fn later_than(&self, other: &Self) -> bool;
}

impl TournamentKey for Pel {
    #[inline]
    fn later_than(&self, other: &Self) -> bool {
        Pel::later_than(self, other)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Cbt {
    tree: Vec<usize>,
    leaf: Vec<Option<usize>>,
    np: usize,
}

impl Cbt {
    /// Empty tree for slots `1..=n`.
    pub fn new(n: usize) -> Self {
        Self {
            tree: vec![0; 2 * n.max(1)],
            leaf: vec![None; n + 1],
            np: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.np == 0
    }

    /// The winning slot, if any.
    #[inline]
    pub fn top(&self) -> Option<usize> {
        (self.np > 0).then(|| self.tree[1])
    }

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        self.leaf.get(i).is_some_and(Option::is_some)
    }

    /// Winner of the two children of node `f`; ties go to the right child.
    #[inline]
    fn winner<K: TournamentKey>(&self, f: usize, keys: &[K]) -> usize {
        let l = self.tree[2 * f];
        let r = self.tree[2 * f + 1];
        if keys[r].later_than(&keys[l]) {
            l
        } else {
            r
        }
    }

    /// Replay the matches on the path from slot `i` to the root.
    pub fn update<K: TournamentKey>(&mut self, i: usize, keys: &[K]) {
        let Some(pos) = self.leaf[i] else {
            return;
        };
        let mut f = pos / 2;
        while f > 0 && self.tree[f] == i {
            self.tree[f] = self.winner(f, keys);
            f /= 2;
        }
        while f > 0 {
            let old = self.tree[f];
            self.tree[f] = self.winner(f, keys);
            if self.tree[f] == old {
                return;
            }
            f /= 2;
        }
    }

    pub fn insert<K: TournamentKey>(&mut self, i: usize, keys: &[K]) {
        debug_assert!(!self.contains(i), "slot {i} inserted twice");
        if self.np > 0 {
            let j = self.tree[self.np];
            self.tree[2 * self.np] = j;
            self.tree[2 * self.np + 1] = i;
            self.leaf[j] = Some(2 * self.np);
            self.leaf[i] = Some(2 * self.np + 1);
            self.np += 1;
            self.update(j, keys);
        } else {
            self.tree[1] = i;
            self.leaf[i] = Some(1);
            self.np = 1;
        }
    }

    pub fn delete<K: TournamentKey>(&mut self, i: usize, keys: &[K]) {
        let Some(pos) = self.leaf[i] else {
            return;
        };
        if self.np < 2 {
            self.tree[1] = 0;
            self.np = 0;
            self.leaf[i] = None;
            return;
        }

        let l = 2 * self.np - 1;
        if self.tree[l - 1] == i {
            let last = self.tree[l];
            self.leaf[last] = Some(l / 2);
            self.tree[l / 2] = last;
            self.update(last, keys);
        } else {
            let sibling = self.tree[l - 1];
            self.leaf[sibling] = Some(l / 2);
            self.tree[l / 2] = sibling;
            self.update(sibling, keys);

            let last = self.tree[l];
            if last != i {
                self.tree[pos] = last;
                self.leaf[last] = Some(pos);
                self.update(last, keys);
            }
        }
        self.np -= 1;
        self.leaf[i] = None;
    }

    pub fn clear(&mut self) {
        self.tree.iter_mut().for_each(|t| *t = 0);
        self.leaf.iter_mut().for_each(|l| *l = None);
        self.np = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Key(f64);

    impl TournamentKey for Key {
        fn later_than(&self, other: &Self) -> bool {
            self.0 > other.0
        }
    }

    fn keys(values: &[f64]) -> Vec<Key> {
        std::iter::once(f64::INFINITY)
            .chain(values.iter().copied())
            .map(Key)
            .collect()
    }

    #[test]
    fn top_tracks_minimum_through_inserts() {
        let k = keys(&[5.0, 3.0, 8.0, 1.0, 4.0]);
        let mut cbt = Cbt::new(5);
        assert!(cbt.top().is_none());
        for i in 1..=5 {
            cbt.insert(i, &k);
        }
        assert!((1..=5).all(|i| cbt.contains(i)));
        assert_eq!(cbt.top(), Some(4));
    }

    #[test]
    fn delete_and_update_keep_the_winner() {
        let mut k = keys(&[5.0, 3.0, 8.0, 1.0, 4.0, 2.0]);
        let mut cbt = Cbt::new(6);
        for i in 1..=6 {
            cbt.insert(i, &k);
        }
        cbt.delete(4, &k);
        assert!(!cbt.contains(4));
        assert_eq!(cbt.top(), Some(6));
        k[6].0 = 9.0;
        cbt.update(6, &k);
        assert_eq!(cbt.top(), Some(2));
        k[3].0 = 0.5;
        cbt.update(3, &k);
        assert_eq!(cbt.top(), Some(3));
    }

    #[test]
    fn draining_returns_sorted_order() {
        let values = [7.0, 2.0, 9.0, 4.0, 4.5, 1.0, 8.0, 3.0, 6.0];
        let k = keys(&values);
        let mut cbt = Cbt::new(values.len());
        for i in 1..=values.len() {
            cbt.insert(i, &k);
        }
        let mut out = Vec::new();
        while let Some(top) = cbt.top() {
            out.push(k[top].0);
            cbt.delete(top, &k);
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(out, sorted);
        assert!(cbt.is_empty());
    }

    #[test]
    fn deleting_every_position_is_consistent() {
        let values = [7.0, 2.0, 9.0, 4.0, 4.5, 1.0, 8.0];
        for victim in 1..=values.len() {
            let k = keys(&values);
            let mut cbt = Cbt::new(values.len());
            for i in 1..=values.len() {
                cbt.insert(i, &k);
            }
            cbt.delete(victim, &k);
            let mut out = Vec::new();
            while let Some(top) = cbt.top() {
                out.push(top);
                cbt.delete(top, &k);
            }
            let mut expected: Vec<usize> = (1..=values.len()).filter(|&i| i != victim).collect();
            expected.sort_by(|&a, &b| values[a - 1].total_cmp(&values[b - 1]));
            assert_eq!(out, expected, "victim {victim}");
        }
    }
}
