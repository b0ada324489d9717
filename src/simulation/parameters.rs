//! Simulation parameters and configuration.
//!
//! Everything here is plain serde data. [`FitnessConfig::template`] turns a
//! configuration into the provider every founder is cloned from; the
//! demographic part is [`DemographicModel`] itself.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::base::{Nucleotide, Sequence};
use crate::errors::{BuilderError, ConfigError};
use crate::evolution::{
    Allele, AnyProvider, CodonSites, EffectKernel, IndependentSites, MutationCountParams,
    MutationCountProvider, MutationModel, NeutralProvider, QuantitativeParams,
    QuantitativeProvider, SequenceProvider, SiteFitnessModel, TwoAlleleParams, TwoAlleleProvider,
};
use crate::genealogy::MAX_TREE_ITERATIONS;
use crate::simulation::DemographicModel;

/// Substitution process of sequence-based fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MutationConfig {
    /// Equal rates between all bases.
    Jc69 {
        mu: f64,
        #[serde(default)]
        site_rates: Option<Vec<f64>>,
    },
    /// Transitions weighted `kappa` relative to transversions.
    K2p {
        mu: f64,
        kappa: f64,
        #[serde(default)]
        site_rates: Option<Vec<f64>>,
    },
    /// Explicit 4x4 substitution weights in A, C, G, T order.
    Matrix {
        mu: f64,
        matrix: [[f64; 4]; 4],
        #[serde(default)]
        site_rates: Option<Vec<f64>>,
    },
}

impl MutationConfig {
    pub fn build(&self) -> Result<MutationModel, BuilderError> {
        let (model, rates) = match self {
            MutationConfig::Jc69 { mu, site_rates } => (MutationModel::jc69(*mu), site_rates),
            MutationConfig::K2p {
                mu,
                kappa,
                site_rates,
            } => (MutationModel::k2p(*mu, *kappa), site_rates),
            MutationConfig::Matrix {
                mu,
                matrix,
                site_rates,
            } => (MutationModel::new(*mu, *matrix), site_rates),
        };
        let mut model = model.map_err(mutation_error)?;
        if let Some(rates) = rates {
            model = model.with_site_rates(rates.clone()).map_err(mutation_error)?;
        }
        Ok(model)
    }
}

fn mutation_error(err: crate::errors::MutationError) -> BuilderError {
    BuilderError::InvalidParameter(format!("mutation model: {err}"))
}

/// Per-site selection on a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SiteModelConfig {
    /// The same coefficient at every site.
    Uniform { effect: f64 },
    /// One coefficient per site.
    Effects { effects: Vec<f64> },
    /// Sites drawn from discrete classes.
    Classes {
        effects: Vec<f64>,
        proportions: Vec<f64>,
    },
    /// Gamma-distributed coefficients.
    Gamma { shape: f64, mean: f64 },
    /// Codon-aware selection against amino-acid changes.
    Codon {
        synonymous: f64,
        nonsynonymous: f64,
        nonsense: f64,
    },
}

impl SiteModelConfig {
    pub fn build<R: Rng + ?Sized>(
        &self,
        len: usize,
        rng: &mut R,
    ) -> Result<Arc<dyn SiteFitnessModel>, ConfigError> {
        Ok(match self {
            SiteModelConfig::Uniform { effect } => Arc::new(IndependentSites::uniform(len, *effect)?),
            SiteModelConfig::Effects { effects } => {
                Arc::new(IndependentSites::from_effects(effects.clone())?)
            }
            SiteModelConfig::Classes {
                effects,
                proportions,
            } => Arc::new(IndependentSites::from_classes(len, effects, proportions, rng)?),
            SiteModelConfig::Gamma { shape, mean } => {
                Arc::new(IndependentSites::gamma(len, *shape, *mean, rng)?)
            }
            SiteModelConfig::Codon {
                synonymous,
                nonsynonymous,
                nonsense,
            } => Arc::new(CodonSites::new(*synonymous, *nonsynonymous, *nonsense)?),
        })
    }
}

/// How the master sequence is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MasterConfig {
    /// Every site the same base.
    Uniform { base: char },
    /// Uniformly random bases.
    Random,
    /// A literal sequence string.
    Explicit { sequence: String },
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig::Uniform { base: 'A' }
    }
}

impl MasterConfig {
    pub fn build<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Result<Sequence, BuilderError> {
        let sequence = match self {
            MasterConfig::Uniform { base } => {
                let base = u8::try_from(*base)
                    .ok()
                    .and_then(Nucleotide::from_ascii)
                    .ok_or_else(|| {
                        BuilderError::InvalidParameter(format!("'{base}' is not a nucleotide"))
                    })?;
                Sequence::uniform(base, len)
            }
            MasterConfig::Random => Sequence::random(len, rng),
            MasterConfig::Explicit { sequence } => sequence.parse::<Sequence>()?,
        };
        if sequence.len() != len {
            return Err(ConfigError::LengthMismatch {
                what: "master sequence",
                expected: len,
                found: sequence.len(),
            }
            .into());
        }
        Ok(sequence)
    }
}

/// What carries fitness in each individual.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitnessConfig {
    /// No selection.
    #[default]
    Neutral,
    /// A nucleotide sequence scored against a master.
    Sequence {
        length: usize,
        #[serde(default)]
        master: MasterConfig,
        mutation: MutationConfig,
        #[serde(default)]
        site_model: Option<SiteModelConfig>,
    },
    /// A multiplicative quantitative trait.
    Quantitative { mu: f64, kernel: EffectKernel },
    /// A single biallelic locus.
    TwoAllele {
        forward: f64,
        back: f64,
        derived_fitness: f64,
        #[serde(default = "default_allele")]
        initial: Allele,
    },
    /// Fitness `(1 - effect)^k` after `k` mutations.
    MutationCount { mu: f64, effect: f64 },
}

fn default_allele() -> Allele {
    Allele::Ancestral
}

impl FitnessConfig {
    /// Provider the founders are cloned from. Founders start on the master
    /// sequence, so random parts are drawn from `rng` here.
    pub fn template<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<AnyProvider, BuilderError> {
        Ok(match self {
            FitnessConfig::Neutral => NeutralProvider.into(),
            FitnessConfig::Sequence {
                length,
                master,
                mutation,
                site_model,
            } => {
                if *length == 0 {
                    return Err(ConfigError::EmptySequence.into());
                }
                let master = master.build(*length, rng)?;
                let mutation = Arc::new(mutation.build()?);
                let site_model = site_model
                    .as_ref()
                    .map(|config| config.build(*length, rng))
                    .transpose()?;
                SequenceProvider::new(master.clone(), Arc::new(master), mutation, site_model)?
                    .into()
            }
            FitnessConfig::Quantitative { mu, kernel } => {
                QuantitativeProvider::new(Arc::new(QuantitativeParams::new(*mu, *kernel)?)).into()
            }
            FitnessConfig::TwoAllele {
                forward,
                back,
                derived_fitness,
                initial,
            } => TwoAlleleProvider::new(
                *initial,
                Arc::new(TwoAlleleParams::new(*forward, *back, *derived_fitness)?),
            )
            .into(),
            FitnessConfig::MutationCount { mu, effect } => {
                MutationCountProvider::new(Arc::new(MutationCountParams::new(*mu, *effect)?)).into()
            }
        })
    }
}

/// Run-wide switches, fixed before the first generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Keep providers of ancestral nodes instead of moving them to offspring.
    pub preserve_ancestral_data: bool,
    /// Drop single-child roots after every generation.
    pub auto_shorten_root: bool,
    /// Step cap of [`sample_tree`](crate::simulation::Simulation::sample_tree).
    pub max_tree_iterations: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            preserve_ancestral_data: false,
            auto_shorten_root: true,
            max_tree_iterations: MAX_TREE_ITERATIONS,
        }
    }
}

/// A complete, serializable run description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub demography: DemographicModel,
    #[serde(default)]
    pub fitness: FitnessConfig,
    #[serde(default)]
    pub options: SimulationOptions,
    /// RNG seed; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn new(demography: DemographicModel, fitness: FitnessConfig) -> Self {
        Self {
            demography,
            fitness,
            options: SimulationOptions::default(),
            seed: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BuilderError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, BuilderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
