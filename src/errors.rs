//! Error types shared across the crate.
//!
//! Configuration problems are caught when a model or simulation is built and
//! never retried. Failures during a generation advance are fatal for that call
//! and carry enough context (demographic model, population) for the driver to
//! attribute them. Only the sampling-bound errors are recoverable.

use std::fmt;

use thiserror::Error;

/// Error returned when attempting to convert an invalid byte/character into
/// a `Nucleotide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNucleotide(pub u8);

impl fmt::Display for InvalidNucleotide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid nucleotide byte: {} ('{}')", self.0, self.0 as char)
    }
}

impl std::error::Error for InvalidNucleotide {}

/// Error type for failures when constructing a `Sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSequence {
    /// A character was not recognized as a valid nucleotide.
    #[error("Invalid character in sequence: '{0}'")]
    InvalidChar(char),

    /// The sequence was empty when a non-empty sequence was required.
    #[error("Empty sequence not allowed")]
    EmptySequence,
}

/// Invalid model or simulation parameters, detected before a run starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A rate or probability outside its valid range.
    #[error("Invalid rate for {name}: {value}")]
    InvalidRate { name: &'static str, value: f64 },

    /// Generic parameter problem.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Sequences must contain at least one site.
    #[error("Sequence length must be greater than zero")]
    EmptySequence,

    /// Two arrays that must line up do not.
    #[error("Length mismatch for {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A population size of zero or a founder sample larger than its source.
    #[error("Invalid population size: {0}")]
    InvalidPopulationSize(String),
}

/// Errors that can occur during mutation operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    /// Invalid mutation rate or substitution probability.
    #[error("Invalid mutation rate: {0} (must be finite and non-negative)")]
    InvalidMutationRate(f64),

    /// A positive mutation rate with no outgoing substitution mass.
    #[error("Substitution matrix has no outgoing mass but the mutation rate is positive")]
    DegenerateMatrix,

    /// Site rejection sampling gave up.
    #[error("Site selection rejected {iterations} consecutive candidates")]
    RejectionBoundExceeded { iterations: usize },

    /// Sequence and master (or per-site rates) differ in length.
    #[error("Sequence length {sequence} does not match reference length {reference}")]
    LengthMismatch { sequence: usize, reference: usize },
}

/// A broken structural invariant of the genealogy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    /// A node expected to carry a parent link has none.
    #[error("Node {0} has no parent")]
    MissingParent(String),

    /// A handle that should be live points at a removed node.
    #[error("Stale node handle {0}")]
    StaleHandle(String),

    /// Recombination partnership is not symmetric.
    #[error("Recombination partner of {node} does not point back")]
    AsymmetricPartner { node: String },

    /// Relative fitness was negative or not finite.
    #[error("Relative fitness {value} of node {node} is not a valid weight")]
    RelativeFitness { node: String, value: f64 },

    /// A node's fitness provider was already handed on.
    #[error("Node {0} no longer owns a fitness provider")]
    MissingProvider(String),

    /// A population has no live individuals to reproduce from.
    #[error("Population {0} is empty")]
    EmptyPopulation(usize),
}

/// Errors produced by the simulation core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// Arithmetic domain error (fitness out of range, zero mean fitness, ...).
    #[error("Arithmetic domain error: {0}")]
    Domain(String),

    /// `sample_tree` ran out of iterations before reaching one root.
    #[error("No common ancestor found within {iterations} iterations")]
    NoCommonAncestor { iterations: usize },

    /// More individuals requested than are alive.
    #[error("Requested sample of {requested} but only {available} individuals are alive")]
    SampleTooLarge { requested: usize, available: usize },

    /// Saving or restoring the RNG state failed.
    #[error("RNG checkpoint failed: {0}")]
    Checkpoint(String),

    /// A generation advance failed; identifies where.
    #[error("Generation {generation} failed in {model} model, population {population}: {source}")]
    Generation {
        model: &'static str,
        population: usize,
        generation: usize,
        #[source]
        source: Box<SimError>,
    },
}

impl SimError {
    /// Whether the run may continue after this error.
    ///
    /// Sampling bounds are recoverable: the failed operation left no trace.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoCommonAncestor { .. }
            | Self::SampleTooLarge { .. }
            | Self::Mutation(MutationError::RejectionBoundExceeded { .. }) => true,
            Self::Generation { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Wrap an error raised while advancing `population` of `model`.
    pub(crate) fn in_generation(
        self,
        model: &'static str,
        population: usize,
        generation: usize,
    ) -> Self {
        match self {
            already @ Self::Generation { .. } => already,
            other => Self::Generation {
                model,
                population,
                generation,
                source: Box::new(other),
            },
        }
    }
}

/// Errors that can occur during simulation building.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// A required parameter is missing
    #[error("Missing required parameter: {0}")]
    MissingRequired(&'static str),

    /// An invalid parameter value was provided
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sequence(#[from] InvalidSequence),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Simulation(#[from] SimError),
}
