//! Simulation engine, demographic models and population management.
//!
//! [`Simulation`] drives a [`Demography`], which owns the genealogy arena
//! and one or more [`Population`]s. Configuration lives in [`parameters`]
//! and is assembled by [`SimulationBuilder`].

pub mod builder;
pub mod demography;
pub mod engine;
pub mod parameters;
pub mod population;
pub mod snapshot;

pub use builder::SimulationBuilder;
pub use demography::{
    DemographicModel, Demography, GenerationReport, SizePolicy, SplitPhase, MAX_POPULATION_SIZE,
};
pub use engine::{CancelToken, Simulation};
pub use parameters::{
    FitnessConfig, MasterConfig, MutationConfig, SimulationConfig, SimulationOptions,
    SiteModelConfig,
};
pub use population::{GenerationStats, Population};
pub use snapshot::{IndividualView, PopulationSnapshot, SimulationSnapshot};
