//! wfgen: a forward-time Wright-Fisher simulator with genealogy tracking.
//!
//! Individuals reproduce in discrete, non-overlapping generations under
//! selection and mutation. Every individual is a node of an ancestry graph
//! that is pruned as lineages die out, so a run can go on for millions of
//! generations while still answering "what is the tree of this sample?".
//!
//! Most users start from [`simulation::SimulationBuilder`]; a custom
//! [`evolution::FitnessProvider`] can be run with [`simulation::Simulation::new`].

pub mod base;
pub mod errors;
pub mod evolution;
pub mod genealogy;
pub mod prelude;
pub mod simulation;

// Re-export commonly used types for convenient external access.
pub use base::{Nucleotide, Sequence};
pub use errors::{BuilderError, ConfigError, SimError};
