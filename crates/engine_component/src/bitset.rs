//! Fixed-capacity bit vector used for component masks and slot tracking.

const WORD_BITS: usize = 64;

/// A bit vector over `u64` words with a fixed capacity in bits.
///
/// Component masks use one bit per registered component type, so containment
/// checks between an entity's mask and a query are a handful of word-wise
/// operations. Two sets with different capacities compare as if the shorter
/// one were padded with zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    /// Creates an empty set able to hold bits `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
        }
    }

    /// Number of bits this set can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sets bit `index`. Returns `false` if the index is beyond capacity.
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        true
    }

    /// Clears bit `index`. Out-of-range indices are ignored.
    pub fn unset(&mut self, index: usize) {
        if index < self.capacity {
            self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
        }
    }

    /// Returns `true` if bit `index` is set.
    #[must_use]
    pub fn has(&self, index: usize) -> bool {
        index < self.capacity && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Clears every bit, keeping the capacity.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Grows the capacity to at least `capacity` bits, keeping existing bits.
    /// Never shrinks.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.words.resize(capacity.div_ceil(WORD_BITS), 0);
            self.capacity = capacity;
        }
    }

    fn word(&self, i: usize) -> u64 {
        self.words.get(i).copied().unwrap_or(0)
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    ///
    /// An empty `other` is contained vacuously.
    #[must_use]
    pub fn contains_all(&self, other: &BitSet) -> bool {
        other
            .words
            .iter()
            .enumerate()
            .all(|(i, &w)| self.word(i) & w == w)
    }

    /// Returns `true` if at least one bit set in `other` is also set in
    /// `self`. An empty `other` never matches.
    #[must_use]
    pub fn contains_any(&self, other: &BitSet) -> bool {
        other
            .words
            .iter()
            .enumerate()
            .any(|(i, &w)| self.word(i) & w != 0)
    }

    /// Returns `true` if no bit set in `other` is set in `self`.
    #[must_use]
    pub fn excludes_all(&self, other: &BitSet) -> bool {
        !self.contains_any(other)
    }

    /// Sets every bit that is set in `other` (up to this set's capacity).
    pub fn union_with(&mut self, other: &BitSet) {
        let len = self.words.len().min(other.words.len());
        for i in 0..len {
            self.words[i] |= other.words[i];
        }
        self.mask_tail();
    }

    /// Clears every bit that is not set in `other`.
    pub fn intersect_with(&mut self, other: &BitSet) {
        for (i, word) in self.words.iter_mut().enumerate() {
            *word &= other.word(i);
        }
    }

    /// Iterates the indices of set bits in ascending order.
    pub fn ones(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    // Bits past `capacity` in the last word must stay zero.
    fn mask_tail(&mut self) {
        let rem = self.capacity % WORD_BITS;
        if rem != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << rem) - 1;
        }
    }
}

/// Iterator over set bit indices, created by [`BitSet::ones`].
#[derive(Debug, Clone)]
pub struct Ones<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_index * WORD_BITS + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

impl FromIterator<usize> for BitSet {
    /// Collects indices into a set sized to fit the largest one.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let indices: Vec<usize> = iter.into_iter().collect();
        let capacity = indices.iter().max().map_or(0, |&m| m + 1);
        let mut set = BitSet::new(capacity);
        for i in indices {
            set.set(i);
        }
        set
    }
}
