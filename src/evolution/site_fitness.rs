//! Site-level fitness models.
//!
//! A site fitness model scores a sequence against a master sequence. The
//! score is kept in log space: every divergent site (or codon) subtracts its
//! selection coefficient, and fitness is `exp(-Σ coefficients)`.
//!
//! Models can score a generation's substitutions incrementally through
//! [`SiteFitnessModel::fitness_delta`]. A model returns NaN from the delta
//! when it cannot attribute the change locally, which tells the caller to
//! fall back to [`SiteFitnessModel::recompute_fitness`].

use std::fmt;

use rand::distr::weighted::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::base::{Nucleotide, Sequence};
use crate::errors::ConfigError;

/// Scores sequences relative to a master sequence.
pub trait SiteFitnessModel: fmt::Debug + Send + Sync {
    /// Coefficient paid by `site` while it differs from the master.
    fn site_fitness_effect(&self, site: usize, sequence: &Sequence, master: &Sequence) -> f64;

    /// Fitness of `sequence` computed from scratch.
    ///
    /// The default sums [`site_fitness_effect`](Self::site_fitness_effect)
    /// over all divergent sites.
    fn recompute_fitness(&self, sequence: &Sequence, master: &Sequence) -> f64 {
        let load: f64 = (0..sequence.len())
            .filter(|&site| sequence.get(site) != master.get(site))
            .map(|site| self.site_fitness_effect(site, sequence, master))
            .sum();
        (-load).exp()
    }

    /// Log-fitness change caused by this generation's substitutions.
    ///
    /// `sites[i]` held `originals[i]` right before the i-th substitution, and
    /// `sequence` is the state after all of them. A site hit more than once
    /// is scored from the first recorded original.
    fn fitness_delta(
        &self,
        sites: &[usize],
        originals: &[Nucleotide],
        sequence: &Sequence,
        master: &Sequence,
    ) -> f64 {
        let mut events: Vec<(usize, Nucleotide)> =
            sites.iter().copied().zip(originals.iter().copied()).collect();
        events.sort_by_key(|&(site, _)| site);
        events.dedup_by_key(|&mut (site, _)| site);

        events
            .into_iter()
            .map(|(site, original)| {
                let target = master.get(site);
                let before = (original != target) as u8 as f64;
                let now = (sequence.get(site) != target) as u8 as f64;
                (before - now) * self.site_fitness_effect(site, sequence, master)
            })
            .sum()
    }

    /// Check that the model can score sequences of `len` sites.
    fn check_length(&self, len: usize) -> Result<(), ConfigError>;
}

/// Independent sites, each with its own selection coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentSites {
    effects: Vec<f64>,
}

impl IndependentSites {
    /// Same coefficient at every site.
    pub fn uniform(len: usize, effect: f64) -> Result<Self, ConfigError> {
        Self::from_effects(vec![effect; len])
    }

    /// Explicit per-site coefficients.
    pub fn from_effects(effects: Vec<f64>) -> Result<Self, ConfigError> {
        if effects.is_empty() {
            return Err(ConfigError::EmptySequence);
        }
        for &value in &effects {
            check_effect(value)?;
        }
        Ok(Self { effects })
    }

    /// Assign each site to a fitness class.
    ///
    /// Site `i` draws class `j` with probability `proportions[j]` and gets
    /// coefficient `effects[j]`.
    pub fn from_classes<R: Rng + ?Sized>(
        len: usize,
        effects: &[f64],
        proportions: &[f64],
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        if effects.len() != proportions.len() {
            return Err(ConfigError::LengthMismatch {
                what: "site fitness class proportions",
                expected: effects.len(),
                found: proportions.len(),
            });
        }
        if effects.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "at least one site fitness class is required".into(),
            ));
        }
        for &value in effects {
            check_effect(value)?;
        }
        for &p in proportions {
            if !p.is_finite() || p < 0.0 {
                return Err(ConfigError::InvalidRate {
                    name: "class proportion",
                    value: p,
                });
            }
        }
        let total: f64 = proportions.iter().sum();
        if (total - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidParameter(format!(
                "site fitness class proportions sum to {total}, expected 1"
            )));
        }

        let classes = WeightedIndex::new(proportions)
            .map_err(|e| ConfigError::InvalidParameter(format!("class proportions: {e}")))?;
        let site_effects = (0..len).map(|_| effects[classes.sample(rng)]).collect();
        Self::from_effects(site_effects)
    }

    /// Gamma-distributed coefficients with the given shape and mean.
    pub fn gamma<R: Rng + ?Sized>(
        len: usize,
        shape: f64,
        mean: f64,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        if !(shape.is_finite() && shape > 0.0) {
            return Err(ConfigError::InvalidRate {
                name: "gamma shape",
                value: shape,
            });
        }
        if !(mean.is_finite() && mean >= 0.0) {
            return Err(ConfigError::InvalidRate {
                name: "gamma mean",
                value: mean,
            });
        }
        if mean == 0.0 {
            return Self::uniform(len, 0.0);
        }
        let gamma = Gamma::new(shape, mean / shape)
            .map_err(|e| ConfigError::InvalidParameter(format!("gamma: {e}")))?;
        Self::from_effects((0..len).map(|_| gamma.sample(rng)).collect())
    }

    /// Per-site coefficients.
    pub fn effects(&self) -> &[f64] {
        &self.effects
    }
}

impl SiteFitnessModel for IndependentSites {
    #[inline]
    fn site_fitness_effect(&self, site: usize, _sequence: &Sequence, _master: &Sequence) -> f64 {
        self.effects[site]
    }

    fn check_length(&self, len: usize) -> Result<(), ConfigError> {
        if self.effects.len() == len {
            Ok(())
        } else {
            Err(ConfigError::LengthMismatch {
                what: "site fitness effects",
                expected: len,
                found: self.effects.len(),
            })
        }
    }
}

/// Standard genetic code in TCAG order.
const GENETIC_CODE: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

#[inline]
fn tcag(base: Nucleotide) -> usize {
    match base {
        Nucleotide::T => 0,
        Nucleotide::C => 1,
        Nucleotide::A => 2,
        Nucleotide::G => 3,
    }
}

/// Translate one codon with the standard code. Stop codons map to `*`.
pub fn translate(codon: [Nucleotide; 3]) -> char {
    GENETIC_CODE[16 * tcag(codon[0]) + 4 * tcag(codon[1]) + tcag(codon[2])] as char
}

/// Coupled sites read as codons of a protein-coding sequence.
///
/// A codon that differs from the master pays `synonymous` when it still
/// encodes the same amino acid, `nonsense` when it turned a sense codon into
/// a stop, and `nonsynonymous` otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodonSites {
    synonymous: f64,
    nonsynonymous: f64,
    nonsense: f64,
}

impl CodonSites {
    pub fn new(synonymous: f64, nonsynonymous: f64, nonsense: f64) -> Result<Self, ConfigError> {
        check_effect(synonymous)?;
        check_effect(nonsynonymous)?;
        check_effect(nonsense)?;
        Ok(Self {
            synonymous,
            nonsynonymous,
            nonsense,
        })
    }

    fn codon_at(sequence: &Sequence, codon: usize) -> [Nucleotide; 3] {
        let start = 3 * codon;
        [
            sequence.get(start),
            sequence.get(start + 1),
            sequence.get(start + 2),
        ]
    }

    /// Cost of `codon` against `reference`.
    fn codon_cost(&self, codon: [Nucleotide; 3], reference: [Nucleotide; 3]) -> f64 {
        if codon == reference {
            return 0.0;
        }
        let (aa, target) = (translate(codon), translate(reference));
        if aa == target {
            self.synonymous
        } else if aa == '*' {
            self.nonsense
        } else {
            self.nonsynonymous
        }
    }
}

impl SiteFitnessModel for CodonSites {
    fn site_fitness_effect(&self, site: usize, sequence: &Sequence, master: &Sequence) -> f64 {
        let codon = site / 3;
        self.codon_cost(
            Self::codon_at(sequence, codon),
            Self::codon_at(master, codon),
        )
    }

    fn recompute_fitness(&self, sequence: &Sequence, master: &Sequence) -> f64 {
        let load: f64 = (0..sequence.len() / 3)
            .map(|codon| {
                self.codon_cost(
                    Self::codon_at(sequence, codon),
                    Self::codon_at(master, codon),
                )
            })
            .sum();
        (-load).exp()
    }

    fn fitness_delta(
        &self,
        sites: &[usize],
        originals: &[Nucleotide],
        sequence: &Sequence,
        master: &Sequence,
    ) -> f64 {
        let mut events: Vec<(usize, Nucleotide)> =
            sites.iter().copied().zip(originals.iter().copied()).collect();
        events.sort_by_key(|&(site, _)| site);
        if events.windows(2).any(|w| w[0].0 / 3 == w[1].0 / 3) {
            return f64::NAN;
        }

        events
            .into_iter()
            .map(|(site, original)| {
                let codon = site / 3;
                let reference = Self::codon_at(master, codon);
                let now = Self::codon_at(sequence, codon);
                let mut before = now;
                before[site % 3] = original;
                self.codon_cost(before, reference) - self.codon_cost(now, reference)
            })
            .sum()
    }

    fn check_length(&self, len: usize) -> Result<(), ConfigError> {
        if len % 3 == 0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidParameter(format!(
                "codon model needs a length divisible by 3, got {len}"
            )))
        }
    }
}

#[inline]
fn check_effect(value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRate {
            name: "selection coefficient",
            value,
        })
    }
}
