//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```
//! use wfgen::prelude::*;
//!
//! let mut sim = SimulationBuilder::new()
//!     .demography(DemographicModel::Single {
//!         policy: SizePolicy::Constant { size: 20 },
//!     })
//!     .seed(1)
//!     .build()
//!     .unwrap();
//! sim.run_for(10, &CancelToken::new()).unwrap();
//! let tree = sim.sample_tree(5).unwrap();
//! assert!(tree.to_newick().ends_with(';'));
//! ```

pub use crate::base::{Nucleotide, Sequence};
pub use crate::errors::{BuilderError, ConfigError, SimError};
pub use crate::evolution::{AnyProvider, FitnessProvider, MutationModel, SiteFitnessModel};
pub use crate::genealogy::{NodeId, SampleTree};
pub use crate::simulation::{
    CancelToken, DemographicModel, FitnessConfig, Simulation, SimulationBuilder,
    SimulationConfig, SimulationOptions, SizePolicy,
};
