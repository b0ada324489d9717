use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use super::Nucleotide;
use crate::errors::InvalidSequence;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-length nucleotide sequence packed at two bits per site.
///
/// The low and high bit of every site's code live in two separate `u64`
/// planes, so a clone is a plain copy of `2 * ceil(len / 64)` words. The
/// length is fixed at construction; only the content can change.
///
/// Site access out of range is a programmer error and panics. Use
/// [`Sequence::checked_get`] where the index is not known to be valid.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Sequence {
    low: Vec<u64>,
    high: Vec<u64>,
    len: usize,
}

impl Sequence {
    /// Create a sequence of `len` copies of `base`.
    pub fn uniform(base: Nucleotide, len: usize) -> Self {
        let words = len.div_ceil(WORD_BITS);
        let idx = base.to_index();
        let fill = |bit: bool| if bit { vec![u64::MAX; words] } else { vec![0; words] };
        let mut seq = Self {
            low: fill(idx & 1 == 1),
            high: fill(idx & 2 == 2),
            len,
        };
        seq.clear_tail();
        seq
    }

    /// Create a sequence with every site drawn uniformly from the alphabet.
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let words = len.div_ceil(WORD_BITS);
        let mut seq = Self {
            low: (0..words).map(|_| rng.random()).collect(),
            high: (0..words).map(|_| rng.random()).collect(),
            len,
        };
        seq.clear_tail();
        seq
    }

    /// Create a `Sequence` from a slice of `Nucleotide`s.
    pub fn from_nucleotides(nucleotides: &[Nucleotide]) -> Self {
        let mut seq = Self::uniform(Nucleotide::A, nucleotides.len());
        for (site, &base) in nucleotides.iter().enumerate() {
            seq.set(site, base);
        }
        seq
    }

    /// Return the length of the sequence in sites.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Return `true` if the sequence has no sites.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the base at `site`.
    ///
    /// # Panics
    /// Panics if `site >= len()`.
    #[inline]
    pub fn get(&self, site: usize) -> Nucleotide {
        assert!(
            site < self.len,
            "site {site} out of bounds (len = {})",
            self.len
        );
        let (word, bit) = (site / WORD_BITS, site % WORD_BITS);
        Nucleotide::from_bits(
            (self.low[word] >> bit) & 1 == 1,
            (self.high[word] >> bit) & 1 == 1,
        )
    }

    /// Return the base at `site`, or `None` if out of range.
    #[inline]
    pub fn checked_get(&self, site: usize) -> Option<Nucleotide> {
        (site < self.len).then(|| self.get(site))
    }

    /// Set the base at `site`.
    ///
    /// # Panics
    /// Panics if `site >= len()`.
    #[inline]
    pub fn set(&mut self, site: usize, base: Nucleotide) {
        assert!(
            site < self.len,
            "site {site} out of bounds (len = {})",
            self.len
        );
        let (word, bit) = (site / WORD_BITS, site % WORD_BITS);
        let mask = 1u64 << bit;
        let idx = base.to_index();
        if idx & 1 == 1 {
            self.low[word] |= mask;
        } else {
            self.low[word] &= !mask;
        }
        if idx & 2 == 2 {
            self.high[word] |= mask;
        } else {
            self.high[word] &= !mask;
        }
    }

    /// Iterate over the bases in order.
    pub fn iter(&self) -> impl Iterator<Item = Nucleotide> + '_ {
        (0..self.len).map(move |site| self.get(site))
    }

    /// Number of sites at which `self` and `other` differ.
    ///
    /// Works a word at a time on the packed planes.
    ///
    /// # Panics
    /// Panics if the lengths differ.
    pub fn hamming_distance(&self, other: &Sequence) -> usize {
        assert_eq!(self.len, other.len, "sequence lengths differ");
        self.low
            .iter()
            .zip(&self.high)
            .zip(other.low.iter().zip(&other.high))
            .map(|((l1, h1), (l2, h2))| ((l1 ^ l2) | (h1 ^ h2)).count_ones() as usize)
            .sum()
    }

    /// Collect the bases into a vector.
    pub fn to_nucleotides(&self) -> Vec<Nucleotide> {
        self.iter().collect()
    }

    /// Keep the unused bits of the last word at zero so that derived
    /// equality, hashing and `hamming_distance` only see real sites.
    fn clear_tail(&mut self) {
        let rem = self.len % WORD_BITS;
        if rem != 0 {
            let mask = (1u64 << rem) - 1;
            if let Some(last) = self.low.last_mut() {
                *last &= mask;
            }
            if let Some(last) = self.high.last_mut() {
                *last &= mask;
            }
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for base in self.iter() {
            write!(f, "{}", base.to_char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({self})")
    }
}

impl FromStr for Sequence {
    type Err = InvalidSequence;

    /// Parse a textual representation (e.g. "ACGT") into a `Sequence`.
    ///
    /// Case-insensitive. Empty input is rejected since a simulated sequence
    /// always has at least one site.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidSequence::EmptySequence);
        }
        let bases = s
            .chars()
            .map(|c| {
                u8::try_from(c)
                    .ok()
                    .and_then(Nucleotide::from_ascii)
                    .ok_or(InvalidSequence::InvalidChar(c))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_nucleotides(&bases))
    }
}

impl Serialize for Sequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_sequence_from_str_valid() {
        let seq = Sequence::from_str("ACGT").unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.to_string(), "ACGT");
    }

    #[test]
    fn test_sequence_from_str_lowercase() {
        let seq = Sequence::from_str("acgt").unwrap();
        assert_eq!(seq.to_string(), "ACGT");
    }

    #[test]
    fn test_sequence_from_str_invalid() {
        match Sequence::from_str("ACGN") {
            Err(InvalidSequence::InvalidChar('N')) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(Sequence::from_str(""), Err(InvalidSequence::EmptySequence));
    }

    #[test]
    fn test_get_set_across_word_boundary() {
        let mut seq = Sequence::uniform(Nucleotide::A, 130);
        seq.set(63, Nucleotide::T);
        seq.set(64, Nucleotide::G);
        seq.set(129, Nucleotide::C);

        assert_eq!(seq.get(62), Nucleotide::A);
        assert_eq!(seq.get(63), Nucleotide::T);
        assert_eq!(seq.get(64), Nucleotide::G);
        assert_eq!(seq.get(129), Nucleotide::C);

        seq.set(63, Nucleotide::A);
        assert_eq!(seq.get(63), Nucleotide::A);
    }

    #[test]
    fn test_uniform_t_keeps_tail_clear() {
        let a = Sequence::uniform(Nucleotide::T, 70);
        let b = Sequence::from_nucleotides(&[Nucleotide::T; 70]);
        assert_eq!(a, b);
        assert_eq!(a.hamming_distance(&b), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_range_panics() {
        let seq = Sequence::uniform(Nucleotide::A, 10);
        seq.get(10);
    }

    #[test]
    fn test_checked_get() {
        let seq = Sequence::from_str("AC").unwrap();
        assert_eq!(seq.checked_get(1), Some(Nucleotide::C));
        assert_eq!(seq.checked_get(2), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Sequence::from_str("ACGTACGT").unwrap();
        let mut copy = original.clone();
        copy.set(0, Nucleotide::T);

        assert_eq!(original.get(0), Nucleotide::A);
        assert_eq!(copy.get(0), Nucleotide::T);
        assert_eq!(original.hamming_distance(&copy), 1);
    }

    #[test]
    fn test_random_is_deterministic_for_seed() {
        let mut rng1 = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut rng2 = Xoshiro256PlusPlus::seed_from_u64(7);
        let a = Sequence::random(200, &mut rng1);
        let b = Sequence::random(200, &mut rng2);
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
    }

    #[test]
    fn test_serde_as_text() {
        let seq = Sequence::from_str("GATTACA").unwrap();
        let json = serde_json::to_string(&seq).unwrap();
        assert_eq!(json, "\"GATTACA\"");
        let back: Sequence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seq);
    }
}
