//! Builder pattern for creating simulations.
//!
//! Provides a fluent API for configuring and creating simulations with
//! sensible defaults and validation before the first generation.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::errors::BuilderError;
use crate::evolution::AnyProvider;
use crate::simulation::{
    DemographicModel, FitnessConfig, Simulation, SimulationConfig, SimulationOptions,
};

/// Builder for constructing [`Simulation`] instances with a fluent API.
///
/// # Examples
///
/// ```
/// use wfgen::simulation::{DemographicModel, SimulationBuilder, SizePolicy};
///
/// let mut sim = SimulationBuilder::new()
///     .demography(DemographicModel::Single {
///         policy: SizePolicy::Constant { size: 50 },
///     })
///     .seed(42)
///     .build()
///     .unwrap();
///
/// sim.advance_one_generation().unwrap();
/// assert_eq!(sim.current_size(), 50);
/// ```
///
/// # From JSON
///
/// ```
/// use wfgen::simulation::SimulationBuilder;
///
/// let sim = SimulationBuilder::from_json(
///     r#"{ "demography": { "model": "island", "populations": 2, "size": 20,
///                          "migration_rate": 0.05 },
///          "seed": 1 }"#,
/// )
/// .unwrap()
/// .build()
/// .unwrap();
/// assert_eq!(sim.current_size(), 40);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulationBuilder {
    // Required
    demography: Option<DemographicModel>,

    // Defaults: neutral fitness, default options, OS seed
    fitness: FitnessConfig,
    options: SimulationOptions,
    seed: Option<u64>,
}

impl SimulationBuilder {
    /// Create a new simulation builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration.
    pub fn from_config(config: SimulationConfig) -> Self {
        Self {
            demography: Some(config.demography),
            fitness: config.fitness,
            options: config.options,
            seed: config.seed,
        }
    }

    /// Start from a JSON [`SimulationConfig`].
    pub fn from_json(json: &str) -> Result<Self, BuilderError> {
        Ok(Self::from_config(SimulationConfig::from_json(json)?))
    }

    /// Set the demographic model (required).
    pub fn demography(mut self, model: DemographicModel) -> Self {
        self.demography = Some(model);
        self
    }

    pub fn fitness(mut self, fitness: FitnessConfig) -> Self {
        self.fitness = fitness;
        self
    }

    pub fn options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn preserve_ancestral_data(mut self, preserve: bool) -> Self {
        self.options.preserve_ancestral_data = preserve;
        self
    }

    pub fn auto_shorten_root(mut self, shorten: bool) -> Self {
        self.options.auto_shorten_root = shorten;
        self
    }

    pub fn max_tree_iterations(mut self, iterations: usize) -> Self {
        self.options.max_tree_iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The configuration this builder would run.
    pub fn config(&self) -> Result<SimulationConfig, BuilderError> {
        let demography = self
            .demography
            .clone()
            .ok_or(BuilderError::MissingRequired("demography"))?;
        Ok(SimulationConfig {
            demography,
            fitness: self.fitness.clone(),
            options: self.options.clone(),
            seed: self.seed,
        })
    }

    /// Validate everything and found the populations.
    pub fn build(self) -> Result<Simulation<AnyProvider>, BuilderError> {
        let demography = self
            .demography
            .ok_or(BuilderError::MissingRequired("demography"))?;
        demography.validate()?;
        if self.options.max_tree_iterations == 0 {
            return Err(BuilderError::InvalidParameter(
                "max_tree_iterations must be at least 1".into(),
            ));
        }

        let mut rng = match self.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_seed(rand::rng().random()),
        };
        // Random masters and site effects come from the run's own stream.
        let template = self.fitness.template(&mut rng)?;
        Ok(Simulation::with_rng(demography, template, self.options, rng)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{EffectKernel, FitnessProvider};
    use crate::simulation::{MasterConfig, MutationConfig, SizePolicy};
    use crate::errors::ConfigError;

    fn single(size: usize) -> DemographicModel {
        DemographicModel::Single {
            policy: SizePolicy::Constant { size },
        }
    }

    #[test]
    fn test_missing_demography() {
        let result = SimulationBuilder::new().seed(1).build();
        assert!(matches!(
            result,
            Err(BuilderError::MissingRequired("demography"))
        ));
    }

    #[test]
    fn test_invalid_demography() {
        let result = SimulationBuilder::new().demography(single(0)).build();
        assert!(matches!(
            result,
            Err(BuilderError::Config(ConfigError::InvalidPopulationSize(_)))
        ));
    }

    #[test]
    fn test_invalid_fitness() {
        let result = SimulationBuilder::new()
            .demography(single(10))
            .fitness(FitnessConfig::Quantitative {
                mu: 0.1,
                kernel: EffectKernel::Normal { sd: -1.0 },
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_options_are_applied() {
        let sim = SimulationBuilder::new()
            .demography(single(10))
            .preserve_ancestral_data(true)
            .auto_shorten_root(false)
            .max_tree_iterations(100)
            .seed(3)
            .build()
            .unwrap();
        assert!(sim.options().preserve_ancestral_data);
        assert!(!sim.options().auto_shorten_root);
        assert_eq!(sim.options().max_tree_iterations, 100);
    }

    #[test]
    fn test_same_seed_same_run() {
        let builder = SimulationBuilder::new()
            .demography(single(30))
            .fitness(FitnessConfig::Sequence {
                length: 60,
                master: MasterConfig::Random,
                mutation: MutationConfig::Jc69 {
                    mu: 0.01,
                    site_rates: None,
                },
                site_model: None,
            })
            .seed(99);

        let mut a = builder.clone().build().unwrap();
        let mut b = builder.build().unwrap();
        for _ in 0..10 {
            a.advance_one_generation().unwrap();
            b.advance_one_generation().unwrap();
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_config_round_trip_through_builder() {
        let builder = SimulationBuilder::new().demography(single(5)).seed(8);
        let config = builder.config().unwrap();
        let sim = SimulationBuilder::from_config(config).build().unwrap();
        assert_eq!(sim.current_size(), 5);
        let id = sim.populations()[0].live()[0];
        let locus = sim.demography().arena().get(id).unwrap();
        assert_eq!(locus.provider().map(|p| p.kind()), Some("neutral"));
        assert_eq!(locus.provider().map(|p| p.fitness()), Some(1.0));
    }
}
