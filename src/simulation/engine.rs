//! Simulation engine.
//!
//! [`Simulation`] owns the random number generator and the demographic
//! model, and is the only type a driver needs. Everything between two
//! calls to [`Simulation::advance_one_generation`] is read-only except the
//! preservation and master-replacement operations, which take `&mut self`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::demography::{DemographicModel, Demography, GenerationReport};
use super::parameters::SimulationOptions;
use super::population::Population;
use super::snapshot::{IndividualView, SimulationSnapshot};
use crate::base::Sequence;
use crate::errors::SimError;
use crate::evolution::FitnessProvider;
use crate::genealogy::{NodeId, SampleTree};

/// Shared flag that stops [`Simulation::run_for`] between generations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag so the token can drive another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Main simulation engine.
#[derive(Debug, Clone)]
pub struct Simulation<P> {
    demography: Demography<P>,
    options: SimulationOptions,
    /// Xoshiro256++ so the state can be checkpointed with bincode.
    rng: Xoshiro256PlusPlus,
    /// Separate stream for sampling queries, so they never perturb the run.
    sampling_rng: Xoshiro256PlusPlus,
}

impl<P: FitnessProvider> Simulation<P> {
    /// Found every population of `model` with clones of `template`.
    ///
    /// Without a seed the generator is seeded from the OS.
    pub fn new(
        model: DemographicModel,
        template: P,
        options: SimulationOptions,
        seed: Option<u64>,
    ) -> Result<Self, SimError> {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_seed(rand::rng().random()),
        };
        Self::with_rng(model, template, options, rng)
    }

    pub(crate) fn with_rng(
        model: DemographicModel,
        template: P,
        options: SimulationOptions,
        mut rng: Xoshiro256PlusPlus,
    ) -> Result<Self, SimError> {
        let mut sampling_rng = rng.clone();
        sampling_rng.long_jump();
        let demography = Demography::new(
            model,
            &template,
            options.preserve_ancestral_data,
            options.auto_shorten_root,
            &mut rng,
        )?;
        info!(
            "founded {} model: {} individuals in {} population(s)",
            demography.model().name(),
            demography.current_size(),
            demography.populations().len()
        );
        Ok(Self {
            demography,
            options,
            rng,
            sampling_rng,
        })
    }

    /// Advance every population by one generation.
    ///
    /// On error the simulation must be discarded; only sampling errors
    /// ([`SimError::is_recoverable`]) leave it usable, and those are never
    /// returned from here.
    pub fn advance_one_generation(&mut self) -> Result<GenerationReport, SimError> {
        self.demography.advance(&mut self.rng)
    }

    /// Advance up to `generations` times, checking `cancel` before each one.
    ///
    /// Returns the number of generations completed.
    pub fn run_for(&mut self, generations: usize, cancel: &CancelToken) -> Result<usize, SimError> {
        for done in 0..generations {
            if cancel.is_cancelled() {
                info!(
                    "run cancelled at generation {} after {done} of {generations} generations",
                    self.current_generation()
                );
                return Ok(done);
            }
            self.advance_one_generation()?;
        }
        Ok(generations)
    }

    pub fn current_generation(&self) -> usize {
        self.demography.generation()
    }

    pub fn current_size(&self) -> usize {
        self.demography.current_size()
    }

    pub fn model(&self) -> &DemographicModel {
        self.demography.model()
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    pub fn populations(&self) -> &[Population] {
        self.demography.populations()
    }

    pub fn demography(&self) -> &Demography<P> {
        &self.demography
    }

    /// Common ancestor of every live individual.
    pub fn root(&self) -> NodeId {
        self.demography.root()
    }

    /// Draw `k` distinct live individuals across all populations.
    ///
    /// Sampling draws from its own stream: a seeded run evolves the same
    /// whether or not it is sampled.
    pub fn sample(&mut self, k: usize) -> Result<Vec<NodeId>, SimError> {
        self.demography.sample(k, &mut self.sampling_rng)
    }

    /// Draw `k` distinct live individuals from the population at `position`.
    pub fn sample_from(&mut self, position: usize, k: usize) -> Result<Vec<NodeId>, SimError> {
        self.demography
            .sample_from(position, k, &mut self.sampling_rng)
    }

    /// Sample `k` individuals and rebuild their genealogy.
    pub fn sample_tree(&mut self, k: usize) -> Result<SampleTree, SimError> {
        self.demography
            .sample_tree(k, self.options.max_tree_iterations, &mut self.sampling_rng)
    }

    /// Genealogy of chosen individuals.
    pub fn tree_of(&self, samples: &[NodeId]) -> Result<SampleTree, SimError> {
        SampleTree::build(
            self.demography.arena(),
            samples,
            self.model().is_multi_population(),
            self.options.max_tree_iterations,
        )
    }

    /// Inspect any node still held by the genealogy.
    pub fn individual(&self, id: NodeId) -> Option<IndividualView> {
        let multi = self.model().is_multi_population();
        self.demography
            .arena()
            .get(id)
            .map(|locus| IndividualView::new(id, locus, multi))
    }

    pub fn mark_preserved(&mut self, id: NodeId) -> Result<(), SimError> {
        self.demography.mark_preserved(id)
    }

    /// Returns the number of genealogy nodes pruned.
    pub fn unmark_preserved(&mut self, id: NodeId) -> Result<usize, SimError> {
        self.demography.unmark_preserved(id)
    }

    /// Returns the number of genealogy nodes pruned.
    pub fn release_preserved(&mut self) -> Result<usize, SimError> {
        self.demography.release_preserved()
    }

    /// Score every live individual against `master`.
    ///
    /// Individuals whose fitness does not depend on a sequence are left as
    /// they are.
    pub fn replace_master(&mut self, master: Sequence) -> Result<(), SimError> {
        self.demography.replace_master(Arc::new(master))
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot::capture(&self.demography)
    }

    /// Serialized state of both generators, for checkpointing.
    pub fn rng_state_bytes(&self) -> Result<Vec<u8>, SimError> {
        bincode::serialize(&(&self.rng, &self.sampling_rng))
            .map_err(|e| SimError::Checkpoint(format!("failed to serialize RNG state: {e}")))
    }

    /// Restore a generator state written by [`rng_state_bytes`](Self::rng_state_bytes).
    pub fn set_rng_from_bytes(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        let (rng, sampling_rng) = bincode::deserialize(bytes)
            .map_err(|e| SimError::Checkpoint(format!("failed to deserialize RNG state: {e}")))?;
        self.rng = rng;
        self.sampling_rng = sampling_rng;
        Ok(())
    }
}
