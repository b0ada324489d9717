//! Fitness providers.
//!
//! A provider is the heritable state of one individual: the substrate that
//! mutates (a sequence, a scalar trait, an allele, a mutation count, or
//! nothing) together with its cached fitness. Shared read-only parameters
//! are held behind `Arc`, so cloning a provider for an offspring copies only
//! the mutable substrate.
//!
//! Providers report absolute fitness. The population normalizes it into
//! relative fitness every generation; providers whose fitness drifts without
//! bound (see [`FitnessScaling::Rescaled`]) are also rescaled in place.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Exp, Gamma, Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::base::Sequence;
use crate::errors::{ConfigError, SimError};
use crate::evolution::{MutationModel, SiteFitnessModel};

/// Tolerance above zero accepted for log fitness before it is an error.
const LOG_FITNESS_TOLERANCE: f64 = 1e-9;

/// How a provider's absolute fitness behaves across generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessScaling {
    /// Fitness is a function of the substrate and stays in a fixed range.
    Bounded,
    /// Fitness accumulates multiplicatively and must be divided by the
    /// population mean every generation.
    Rescaled,
}

/// State of a biallelic locus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allele {
    Ancestral,
    Derived,
}

/// Borrowed view of whatever a provider mutates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Substrate<'a> {
    None,
    Sequence(&'a Sequence),
    Scalar(f64),
    Allele(Allele),
    Count(u32),
}

impl fmt::Display for Substrate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substrate::None => write!(f, "-"),
            Substrate::Sequence(seq) => write!(f, "{seq}"),
            Substrate::Scalar(value) => write!(f, "{value}"),
            Substrate::Allele(Allele::Ancestral) => write!(f, "ancestral"),
            Substrate::Allele(Allele::Derived) => write!(f, "derived"),
            Substrate::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Heritable, mutable fitness state of one individual.
pub trait FitnessProvider: Clone + fmt::Debug + Send + Sync {
    /// Current absolute fitness. Reflects every mutation applied so far.
    fn fitness(&self) -> f64;

    /// Apply one generation of mutation and update the cached fitness.
    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError>;

    /// The mutating substrate.
    fn substrate(&self) -> Substrate<'_>;

    fn scaling(&self) -> FitnessScaling {
        FitnessScaling::Bounded
    }

    /// Divide the cached fitness by the population mean.
    ///
    /// Only called for [`FitnessScaling::Rescaled`] providers.
    fn rescale(&mut self, _mean: f64) {}

    /// Score against a new master sequence from now on.
    fn replace_master(&mut self, _master: &Arc<Sequence>) -> Result<(), SimError> {
        Ok(())
    }
}

/// No substrate; every individual has fitness 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NeutralProvider;

impl FitnessProvider for NeutralProvider {
    fn fitness(&self) -> f64 {
        1.0
    }

    fn mutate<R: Rng + ?Sized>(&mut self, _rng: &mut R) -> Result<(), SimError> {
        Ok(())
    }

    fn substrate(&self) -> Substrate<'_> {
        Substrate::None
    }
}

/// A nucleotide sequence scored against a shared master sequence.
///
/// Without a site model the sequence evolves neutrally. With one, fitness is
/// tracked in log space and updated from the per-generation delta, falling
/// back to a full recompute when the model reports NaN.
#[derive(Debug, Clone)]
pub struct SequenceProvider {
    sequence: Sequence,
    log_fitness: f64,
    master: Arc<Sequence>,
    mutation: Arc<MutationModel>,
    site_model: Option<Arc<dyn SiteFitnessModel>>,
}

impl SequenceProvider {
    pub fn new(
        sequence: Sequence,
        master: Arc<Sequence>,
        mutation: Arc<MutationModel>,
        site_model: Option<Arc<dyn SiteFitnessModel>>,
    ) -> Result<Self, ConfigError> {
        if sequence.is_empty() {
            return Err(ConfigError::EmptySequence);
        }
        if sequence.len() != master.len() {
            return Err(ConfigError::LengthMismatch {
                what: "master sequence",
                expected: sequence.len(),
                found: master.len(),
            });
        }
        if let Some(rates) = mutation.site_rates() {
            if rates.len() != sequence.len() {
                return Err(ConfigError::LengthMismatch {
                    what: "per-site mutation rates",
                    expected: sequence.len(),
                    found: rates.len(),
                });
            }
        }
        if let Some(model) = &site_model {
            model.check_length(sequence.len())?;
        }

        let mut provider = Self {
            sequence,
            log_fitness: 0.0,
            master,
            mutation,
            site_model,
        };
        provider.recompute();
        Ok(provider)
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn master(&self) -> &Arc<Sequence> {
        &self.master
    }

    /// Log of the current fitness.
    pub fn log_fitness(&self) -> f64 {
        self.log_fitness
    }

    /// Recompute fitness from the whole sequence.
    pub fn recompute(&mut self) {
        self.log_fitness = match &self.site_model {
            Some(model) => model.recompute_fitness(&self.sequence, &self.master).ln(),
            None => 0.0,
        };
    }

    fn check_fitness(&mut self) -> Result<(), SimError> {
        if self.log_fitness.is_nan() || self.log_fitness > LOG_FITNESS_TOLERANCE {
            return Err(SimError::Domain(format!(
                "sequence fitness {} outside [0, 1]",
                self.log_fitness.exp()
            )));
        }
        // Rounding residue from summing deltas.
        if self.log_fitness > 0.0 {
            self.log_fitness = 0.0;
        }
        Ok(())
    }
}

impl FitnessProvider for SequenceProvider {
    fn fitness(&self) -> f64 {
        self.log_fitness.exp()
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        let Some(model) = &self.site_model else {
            self.mutation.mutate(&mut self.sequence, rng)?;
            return Ok(());
        };

        let delta =
            self.mutation
                .mutate_and_score_delta(&mut self.sequence, &self.master, model.as_ref(), rng)?;
        if delta.is_nan() {
            self.recompute();
        } else {
            self.log_fitness += delta;
        }
        self.check_fitness()
    }

    fn substrate(&self) -> Substrate<'_> {
        Substrate::Sequence(&self.sequence)
    }

    fn replace_master(&mut self, master: &Arc<Sequence>) -> Result<(), SimError> {
        if master.len() != self.sequence.len() {
            return Err(ConfigError::LengthMismatch {
                what: "master sequence",
                expected: self.sequence.len(),
                found: master.len(),
            }
            .into());
        }
        self.master = Arc::clone(master);
        self.recompute();
        self.check_fitness()
    }
}

/// Distribution of the log-fitness effect of one quantitative mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectKernel {
    /// Normal(0, sd).
    Normal { sd: f64 },
    /// Gamma(shape, scale) magnitude with a random sign.
    Gamma {
        shape: f64,
        scale: f64,
        positive_fraction: f64,
    },
    /// Uniform(-half_width, half_width).
    Uniform { half_width: f64 },
    /// Exponential(rate) magnitude with a random sign.
    Exponential { rate: f64, positive_fraction: f64 },
}

impl EffectKernel {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { name, value })
            }
        };
        let probability = |value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate {
                    name: "positive_fraction",
                    value,
                })
            }
        };
        match *self {
            EffectKernel::Normal { sd } => positive("sd", sd),
            EffectKernel::Gamma {
                shape,
                scale,
                positive_fraction,
            } => {
                positive("shape", shape)?;
                positive("scale", scale)?;
                probability(positive_fraction)
            }
            EffectKernel::Uniform { half_width } => positive("half_width", half_width),
            EffectKernel::Exponential {
                rate,
                positive_fraction,
            } => {
                positive("rate", rate)?;
                probability(positive_fraction)
            }
        }
    }

    /// Draw one effect.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, SimError> {
        let domain = |e: &dyn fmt::Display| SimError::Domain(format!("effect kernel: {e}"));
        let effect = match *self {
            EffectKernel::Normal { sd } => Normal::new(0.0, sd).map_err(|e| domain(&e))?.sample(rng),
            EffectKernel::Gamma {
                shape,
                scale,
                positive_fraction,
            } => {
                let magnitude = Gamma::new(shape, scale).map_err(|e| domain(&e))?.sample(rng);
                signed(magnitude, positive_fraction, rng)
            }
            EffectKernel::Uniform { half_width } => rng.random_range(-half_width..half_width),
            EffectKernel::Exponential {
                rate,
                positive_fraction,
            } => {
                let magnitude = Exp::new(rate).map_err(|e| domain(&e))?.sample(rng);
                signed(magnitude, positive_fraction, rng)
            }
        };
        Ok(effect)
    }
}

#[inline]
fn signed<R: Rng + ?Sized>(magnitude: f64, positive_fraction: f64, rng: &mut R) -> f64 {
    if rng.random_bool(positive_fraction) {
        magnitude
    } else {
        -magnitude
    }
}

/// Shared parameters of [`QuantitativeProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct QuantitativeParams {
    /// Expected number of mutations per individual per generation.
    pub mu: f64,
    pub kernel: EffectKernel,
}

impl QuantitativeParams {
    pub fn new(mu: f64, kernel: EffectKernel) -> Result<Self, ConfigError> {
        if !(mu.is_finite() && mu >= 0.0) {
            return Err(ConfigError::InvalidRate { name: "mu", value: mu });
        }
        kernel.validate()?;
        Ok(Self { mu, kernel })
    }
}

/// A scalar trait whose mutations multiply fitness by `exp(effect)`.
#[derive(Debug, Clone)]
pub struct QuantitativeProvider {
    trait_value: f64,
    fitness: f64,
    params: Arc<QuantitativeParams>,
}

impl QuantitativeProvider {
    pub fn new(params: Arc<QuantitativeParams>) -> Self {
        Self {
            trait_value: 0.0,
            fitness: 1.0,
            params,
        }
    }

    /// Sum of all effects inherited so far.
    pub fn trait_value(&self) -> f64 {
        self.trait_value
    }
}

impl FitnessProvider for QuantitativeProvider {
    fn fitness(&self) -> f64 {
        self.fitness
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        let events = poisson_count(self.params.mu, rng);
        for _ in 0..events {
            let effect = self.params.kernel.sample(rng)?;
            self.trait_value += effect;
            self.fitness *= effect.exp();
        }
        if !self.fitness.is_finite() || self.fitness < 0.0 {
            return Err(SimError::Domain(format!(
                "quantitative fitness {} is not a finite non-negative value",
                self.fitness
            )));
        }
        Ok(())
    }

    fn substrate(&self) -> Substrate<'_> {
        Substrate::Scalar(self.trait_value)
    }

    fn scaling(&self) -> FitnessScaling {
        FitnessScaling::Rescaled
    }

    fn rescale(&mut self, mean: f64) {
        self.fitness /= mean;
    }
}

/// Shared parameters of [`TwoAlleleProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct TwoAlleleParams {
    /// Per-generation probability ancestral -> derived.
    pub forward: f64,
    /// Per-generation probability derived -> ancestral.
    pub back: f64,
    /// Fitness of the derived allele (ancestral is 1).
    pub derived_fitness: f64,
}

impl TwoAlleleParams {
    pub fn new(forward: f64, back: f64, derived_fitness: f64) -> Result<Self, ConfigError> {
        for (name, value) in [("forward", forward), ("back", back)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidRate { name, value });
            }
        }
        if !(derived_fitness.is_finite() && derived_fitness >= 0.0) {
            return Err(ConfigError::InvalidRate {
                name: "derived_fitness",
                value: derived_fitness,
            });
        }
        Ok(Self {
            forward,
            back,
            derived_fitness,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TwoAlleleProvider {
    allele: Allele,
    params: Arc<TwoAlleleParams>,
}

impl TwoAlleleProvider {
    pub fn new(allele: Allele, params: Arc<TwoAlleleParams>) -> Self {
        Self { allele, params }
    }

    pub fn allele(&self) -> Allele {
        self.allele
    }
}

impl FitnessProvider for TwoAlleleProvider {
    fn fitness(&self) -> f64 {
        match self.allele {
            Allele::Ancestral => 1.0,
            Allele::Derived => self.params.derived_fitness,
        }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        self.allele = match self.allele {
            Allele::Ancestral if rng.random_bool(self.params.forward) => Allele::Derived,
            Allele::Derived if rng.random_bool(self.params.back) => Allele::Ancestral,
            unchanged => unchanged,
        };
        Ok(())
    }

    fn substrate(&self) -> Substrate<'_> {
        Substrate::Allele(self.allele)
    }
}

/// Shared parameters of [`MutationCountProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct MutationCountParams {
    /// Expected new deleterious mutations per generation.
    pub mu: f64,
    /// Multiplicative cost of each mutation.
    pub effect: f64,
}

impl MutationCountParams {
    pub fn new(mu: f64, effect: f64) -> Result<Self, ConfigError> {
        if !(mu.is_finite() && mu >= 0.0) {
            return Err(ConfigError::InvalidRate { name: "mu", value: mu });
        }
        if !(0.0..=1.0).contains(&effect) {
            return Err(ConfigError::InvalidRate {
                name: "effect",
                value: effect,
            });
        }
        Ok(Self { mu, effect })
    }
}

/// Counts deleterious mutations; fitness is `(1 - effect)^count`.
#[derive(Debug, Clone)]
pub struct MutationCountProvider {
    count: u32,
    params: Arc<MutationCountParams>,
}

impl MutationCountProvider {
    pub fn new(params: Arc<MutationCountParams>) -> Self {
        Self { count: 0, params }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl FitnessProvider for MutationCountProvider {
    fn fitness(&self) -> f64 {
        (1.0 - self.params.effect).powf(self.count as f64)
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        let events = poisson_count(self.params.mu, rng);
        self.count = self.count.saturating_add(events as u32);
        Ok(())
    }

    fn substrate(&self) -> Substrate<'_> {
        Substrate::Count(self.count)
    }
}

fn poisson_count<R: Rng + ?Sized>(lambda: f64, rng: &mut R) -> u64 {
    if lambda <= 0.0 {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(poisson) => poisson.sample(rng) as u64,
        Err(_) => 0,
    }
}

/// Any of the built-in providers, chosen at runtime.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Neutral(NeutralProvider),
    Sequence(SequenceProvider),
    Quantitative(QuantitativeProvider),
    TwoAllele(TwoAlleleProvider),
    MutationCount(MutationCountProvider),
}

impl AnyProvider {
    /// Short name of the variant, used in logs and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            AnyProvider::Neutral(_) => "neutral",
            AnyProvider::Sequence(_) => "sequence",
            AnyProvider::Quantitative(_) => "quantitative",
            AnyProvider::TwoAllele(_) => "two_allele",
            AnyProvider::MutationCount(_) => "mutation_count",
        }
    }
}

impl FitnessProvider for AnyProvider {
    fn fitness(&self) -> f64 {
        match self {
            AnyProvider::Neutral(p) => p.fitness(),
            AnyProvider::Sequence(p) => p.fitness(),
            AnyProvider::Quantitative(p) => p.fitness(),
            AnyProvider::TwoAllele(p) => p.fitness(),
            AnyProvider::MutationCount(p) => p.fitness(),
        }
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        match self {
            AnyProvider::Neutral(p) => p.mutate(rng),
            AnyProvider::Sequence(p) => p.mutate(rng),
            AnyProvider::Quantitative(p) => p.mutate(rng),
            AnyProvider::TwoAllele(p) => p.mutate(rng),
            AnyProvider::MutationCount(p) => p.mutate(rng),
        }
    }

    fn substrate(&self) -> Substrate<'_> {
        match self {
            AnyProvider::Neutral(p) => p.substrate(),
            AnyProvider::Sequence(p) => p.substrate(),
            AnyProvider::Quantitative(p) => p.substrate(),
            AnyProvider::TwoAllele(p) => p.substrate(),
            AnyProvider::MutationCount(p) => p.substrate(),
        }
    }

    fn scaling(&self) -> FitnessScaling {
        match self {
            AnyProvider::Quantitative(p) => p.scaling(),
            _ => FitnessScaling::Bounded,
        }
    }

    fn rescale(&mut self, mean: f64) {
        if let AnyProvider::Quantitative(p) = self {
            p.rescale(mean);
        }
    }

    fn replace_master(&mut self, master: &Arc<Sequence>) -> Result<(), SimError> {
        match self {
            AnyProvider::Sequence(p) => p.replace_master(master),
            _ => Ok(()),
        }
    }
}

impl From<NeutralProvider> for AnyProvider {
    fn from(p: NeutralProvider) -> Self {
        AnyProvider::Neutral(p)
    }
}

impl From<SequenceProvider> for AnyProvider {
    fn from(p: SequenceProvider) -> Self {
        AnyProvider::Sequence(p)
    }
}

impl From<QuantitativeProvider> for AnyProvider {
    fn from(p: QuantitativeProvider) -> Self {
        AnyProvider::Quantitative(p)
    }
}

impl From<TwoAlleleProvider> for AnyProvider {
    fn from(p: TwoAlleleProvider) -> Self {
        AnyProvider::TwoAllele(p)
    }
}

impl From<MutationCountProvider> for AnyProvider {
    fn from(p: MutationCountProvider) -> Self {
        AnyProvider::MutationCount(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Nucleotide;
    use crate::evolution::{CodonSites, IndependentSites};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn sequence_provider(len: usize, mu: f64, effect: f64) -> SequenceProvider {
        let master = Arc::new(Sequence::uniform(Nucleotide::A, len));
        let model = Arc::new(MutationModel::jc69(mu).unwrap());
        let sites: Arc<dyn SiteFitnessModel> =
            Arc::new(IndependentSites::uniform(len, effect).unwrap());
        SequenceProvider::new((*master).clone(), master, model, Some(sites)).unwrap()
    }

    #[test]
    fn test_neutral_provider() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut p = NeutralProvider;
        p.mutate(&mut rng).unwrap();
        assert_eq!(p.fitness(), 1.0);
        assert_eq!(p.substrate(), Substrate::None);
    }

    #[test]
    fn test_sequence_provider_starts_at_master_fitness() {
        let p = sequence_provider(100, 0.01, 0.05);
        assert_eq!(p.fitness(), 1.0);
        assert_eq!(p.log_fitness(), 0.0);
    }

    #[test]
    fn test_sequence_provider_incremental_matches_recompute() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut p = sequence_provider(400, 0.005, 0.02);
        for _ in 0..100 {
            p.mutate(&mut rng).unwrap();
        }
        let mut full = p.clone();
        full.recompute();
        assert!((p.fitness() - full.fitness()).abs() < 1e-9);
        assert!(p.fitness() <= 1.0);
    }

    #[test]
    fn test_codon_provider_matches_recompute() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        let master = Arc::new(Sequence::random(300, &mut rng));
        let model = Arc::new(MutationModel::jc69(0.01).unwrap());
        let sites: Arc<dyn SiteFitnessModel> = Arc::new(CodonSites::new(0.001, 0.02, 0.5).unwrap());
        let mut p = SequenceProvider::new((*master).clone(), master, model, Some(sites)).unwrap();
        for _ in 0..60 {
            p.mutate(&mut rng).unwrap();
        }
        let mut full = p.clone();
        full.recompute();
        assert!((p.log_fitness() - full.log_fitness()).abs() < 1e-9);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let original = sequence_provider(200, 0.05, 0.01);
        let mut copy = original.clone();
        copy.mutate(&mut rng).unwrap();

        assert_ne!(copy.sequence(), original.sequence());
        assert_eq!(original.sequence(), &Sequence::uniform(Nucleotide::A, 200));
        assert!(Arc::ptr_eq(original.master(), copy.master()));
    }

    #[test]
    fn test_sequence_provider_rejects_bad_lengths() {
        let master = Arc::new(Sequence::uniform(Nucleotide::A, 10));
        let model = Arc::new(MutationModel::jc69(0.01).unwrap());
        assert!(matches!(
            SequenceProvider::new(Sequence::uniform(Nucleotide::A, 9), master.clone(), model.clone(), None),
            Err(ConfigError::LengthMismatch { .. })
        ));
        let codons: Arc<dyn SiteFitnessModel> = Arc::new(CodonSites::new(0.0, 0.1, 1.0).unwrap());
        assert!(SequenceProvider::new((*master).clone(), master, model, Some(codons)).is_err());
    }

    #[test]
    fn test_replace_master_recomputes() {
        let mut p = sequence_provider(10, 0.0, 0.1);
        let mut other = Sequence::uniform(Nucleotide::A, 10);
        other.set(0, Nucleotide::C);
        other.set(1, Nucleotide::C);
        p.replace_master(&Arc::new(other)).unwrap();
        assert!((p.fitness() - (-0.2f64).exp()).abs() < 1e-12);

        let short = Arc::new(Sequence::uniform(Nucleotide::A, 5));
        assert!(p.replace_master(&short).is_err());
    }

    #[test]
    fn test_quantitative_rescale() {
        let params = Arc::new(
            QuantitativeParams::new(2.0, EffectKernel::Normal { sd: 0.1 }).unwrap(),
        );
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mut p = QuantitativeProvider::new(params);
        for _ in 0..10 {
            p.mutate(&mut rng).unwrap();
        }
        assert!((p.fitness() - p.trait_value().exp()).abs() < 1e-9);

        let before = p.fitness();
        p.rescale(2.0);
        assert!((p.fitness() - before / 2.0).abs() < 1e-12);
        assert_eq!(p.scaling(), FitnessScaling::Rescaled);
    }

    #[test]
    fn test_kernel_signs() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let always_negative = EffectKernel::Exponential {
            rate: 10.0,
            positive_fraction: 0.0,
        };
        for _ in 0..100 {
            assert!(always_negative.sample(&mut rng).unwrap() <= 0.0);
        }
        let always_positive = EffectKernel::Gamma {
            shape: 1.0,
            scale: 0.1,
            positive_fraction: 1.0,
        };
        for _ in 0..100 {
            assert!(always_positive.sample(&mut rng).unwrap() >= 0.0);
        }
        let uniform = EffectKernel::Uniform { half_width: 0.5 };
        for _ in 0..100 {
            assert!(uniform.sample(&mut rng).unwrap().abs() <= 0.5);
        }
    }

    #[test]
    fn test_kernel_validation() {
        assert!(EffectKernel::Normal { sd: 0.0 }.validate().is_err());
        assert!(EffectKernel::Gamma {
            shape: 1.0,
            scale: 1.0,
            positive_fraction: 1.5
        }
        .validate()
        .is_err());
        assert!(QuantitativeParams::new(-1.0, EffectKernel::Normal { sd: 1.0 }).is_err());
    }

    #[test]
    fn test_two_allele_flips() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let params = Arc::new(TwoAlleleParams::new(1.0, 0.0, 0.9).unwrap());
        let mut p = TwoAlleleProvider::new(Allele::Ancestral, params);
        assert_eq!(p.fitness(), 1.0);
        p.mutate(&mut rng).unwrap();
        assert_eq!(p.allele(), Allele::Derived);
        assert_eq!(p.fitness(), 0.9);
        p.mutate(&mut rng).unwrap();
        assert_eq!(p.allele(), Allele::Derived);

        assert!(TwoAlleleParams::new(1.5, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_mutation_count_fitness() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let params = Arc::new(MutationCountParams::new(0.5, 0.1).unwrap());
        let mut p = MutationCountProvider::new(params);
        for _ in 0..20 {
            p.mutate(&mut rng).unwrap();
        }
        assert!(p.count() > 0);
        assert!((p.fitness() - 0.9f64.powi(p.count() as i32)).abs() < 1e-12);
    }

    #[test]
    fn test_any_provider_delegates() {
        let params = Arc::new(QuantitativeParams::new(1.0, EffectKernel::Normal { sd: 0.1 }).unwrap());
        let mut any: AnyProvider = QuantitativeProvider::new(params).into();
        assert_eq!(any.kind(), "quantitative");
        assert_eq!(any.scaling(), FitnessScaling::Rescaled);
        any.rescale(0.5);
        assert!((any.fitness() - 2.0).abs() < 1e-12);

        let neutral: AnyProvider = NeutralProvider.into();
        assert_eq!(neutral.scaling(), FitnessScaling::Bounded);
        assert_eq!(neutral.substrate().to_string(), "-");
    }
}
