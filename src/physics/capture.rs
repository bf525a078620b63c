use std::collections::HashSet;

/// Set of captured (bonded) particle pairs, stored unordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureMap {
    pairs: HashSet<(usize, usize)>,
}

#[inline]
fn key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl CaptureMap {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_captured(&self, a: usize, b: usize) -> bool {
        self.pairs.contains(&key(a, b))
    }

    /// Returns false if the pair was already captured.
    pub fn add(&mut self, a: usize, b: usize) -> bool {
        self.pairs.insert(key(a, b))
    }

    /// Returns false if the pair was not captured.
    pub fn remove(&mut self, a: usize, b: usize) -> bool {
        self.pairs.remove(&key(a, b))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}
