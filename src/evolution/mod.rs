//! Evolution module providing mutation and fitness.
//!
//! - **Mutation**: point substitutions driven by a rate and a substitution
//!   matrix, with incremental fitness scoring
//! - **Site fitness**: independent-site and codon models scored against a
//!   master sequence
//! - **Providers**: the heritable fitness state carried by each individual

pub mod mutation;
pub mod provider;
pub mod site_fitness;

pub use mutation::{MutationError, MutationModel, MAX_REJECTIONS};
pub use provider::{
    Allele, AnyProvider, EffectKernel, FitnessProvider, FitnessScaling, MutationCountParams,
    MutationCountProvider, NeutralProvider, QuantitativeParams, QuantitativeProvider,
    SequenceProvider, Substrate, TwoAlleleParams, TwoAlleleProvider,
};
pub use site_fitness::{translate, CodonSites, IndependentSites, SiteFitnessModel};
