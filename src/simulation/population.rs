//! Population management and the Wright-Fisher generation advance.
//!
//! A [`Population`] holds handles only; the nodes themselves live in the
//! [`Arena`] owned by the demographic model, which may be shared by several
//! populations.

use log::warn;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::errors::{InvariantViolation, SimError};
use crate::evolution::{FitnessProvider, FitnessScaling};
use crate::genealogy::{Arena, Locus, NodeId};

/// Relative fitness up to this value is sampled at the nominal rate.
const BASE_CEILING: f64 = 2.0;

/// What one call to [`Population::reproduce`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    pub population: usize,
    pub size: usize,
    /// Mean absolute fitness of the new generation before normalization.
    pub mean_fitness: f64,
    /// Offspring whose mutation step gave up and were left unmutated.
    pub skipped_mutations: usize,
    /// Nodes removed by pruning.
    pub pruned: usize,
}

/// One deme of the simulation.
#[derive(Debug, Clone)]
pub struct Population {
    index: usize,
    live: Vec<NodeId>,
    root: NodeId,
    generation: usize,
    preserve_ancestral_data: bool,
    auto_shorten_root: bool,
    mean_fitness: f64,
    ceiling: f64,
    /// Preserved nodes that must survive pruning.
    preserved: Vec<NodeId>,
}

impl Population {
    pub fn new(
        index: usize,
        live: Vec<NodeId>,
        root: NodeId,
        preserve_ancestral_data: bool,
        auto_shorten_root: bool,
    ) -> Self {
        Self {
            index,
            live,
            root,
            generation: 0,
            preserve_ancestral_data,
            auto_shorten_root,
            mean_fitness: 1.0,
            ceiling: BASE_CEILING,
            preserved: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Handles of the current generation.
    pub fn live(&self) -> &[NodeId] {
        &self.live
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: usize) {
        self.generation = generation;
    }

    pub fn preserve_ancestral_data(&self) -> bool {
        self.preserve_ancestral_data
    }

    /// Mean absolute fitness at the last normalization.
    pub fn mean_fitness(&self) -> f64 {
        self.mean_fitness
    }

    /// Acceptance ceiling of the parent sampler.
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn preserved(&self) -> &[NodeId] {
        &self.preserved
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.live.contains(&id)
    }

    /// Produce the next generation of `target` individuals.
    pub fn reproduce<P, R>(
        &mut self,
        arena: &mut Arena<P>,
        target: usize,
        rng: &mut R,
    ) -> Result<GenerationStats, SimError>
    where
        P: FitnessProvider,
        R: Rng + ?Sized,
    {
        if self.live.is_empty() {
            return Err(InvariantViolation::EmptyPopulation(self.index).into());
        }

        let counts = self.select_parents(arena, target, rng)?;
        let mut staged = self.take_providers(arena, &counts)?;

        let seeds: Vec<u64> = (0..staged.len()).map(|_| rng.random()).collect();
        let skipped = staged
            .par_iter_mut()
            .zip(seeds.par_iter())
            .map(|((_, provider), &seed)| {
                let mut local_rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                match provider.mutate(&mut local_rng) {
                    Ok(()) => Ok(0usize),
                    Err(err) if err.is_recoverable() => Ok(1),
                    Err(err) => Err(err),
                }
            })
            .try_reduce(|| 0, |a, b| Ok(a + b))?;
        if skipped > 0 {
            warn!(
                "population {}: mutation abandoned for {skipped} offspring in generation {}",
                self.index,
                self.generation + 1
            );
        }

        let birth = self.generation as i64 + 1;
        let mut offspring = Vec::with_capacity(staged.len());
        for (parent, provider) in staged {
            let child = arena.insert(Locus::new(rng.random(), self.index as u32, birth, provider));
            arena.link(parent, child)?;
            offspring.push(child);
        }

        let mean_fitness = normalize(arena, &offspring)?;

        let old = std::mem::replace(&mut self.live, offspring);
        let pruned = self.prune(arena, &old)?;

        if self.auto_shorten_root {
            self.root = arena.shorten_root(self.root)?;
        }
        self.mean_fitness = mean_fitness;
        self.generation += 1;

        Ok(GenerationStats {
            population: self.index,
            size: self.live.len(),
            mean_fitness,
            skipped_mutations: skipped,
            pruned,
        })
    }

    /// Rejection-sample `target` parents; returns the offspring count of each
    /// live individual.
    fn select_parents<P, R>(
        &mut self,
        arena: &Arena<P>,
        target: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>, SimError>
    where
        R: Rng + ?Sized,
    {
        let mut weights = Vec::with_capacity(self.live.len());
        let mut max_weight = 0.0f64;
        for &id in &self.live {
            let value = arena.require(id)?.relative_fitness();
            if !value.is_finite() || value < 0.0 {
                return Err(InvariantViolation::RelativeFitness {
                    node: id.to_string(),
                    value,
                }
                .into());
            }
            max_weight = max_weight.max(value);
            weights.push(value);
        }
        if max_weight <= 0.0 {
            return Err(SimError::Domain(format!(
                "population {} has no individual with positive fitness",
                self.index
            )));
        }

        let ceiling = max_weight.max(BASE_CEILING);
        if ceiling > self.ceiling {
            warn!(
                "population {}: relative fitness {max_weight:.4} exceeds {BASE_CEILING}, raising acceptance ceiling",
                self.index
            );
        }
        self.ceiling = ceiling;

        let n = weights.len();
        let mut counts = vec![0usize; n];
        for _ in 0..target {
            loop {
                let candidate = rng.random_range(0..n);
                let r: f64 = rng.random();
                if r * ceiling < weights[candidate] {
                    counts[candidate] += 1;
                    break;
                }
            }
        }
        Ok(counts)
    }

    /// Hand every selected parent's provider on to its offspring.
    ///
    /// The last offspring of a parent receives the parent's own provider
    /// unless ancestral data is preserved or the parent is marked; the
    /// others get clones.
    fn take_providers<P: FitnessProvider>(
        &self,
        arena: &mut Arena<P>,
        counts: &[usize],
    ) -> Result<Vec<(NodeId, P)>, SimError> {
        let total = counts.iter().sum();
        let mut staged = Vec::with_capacity(total);
        for (&parent, &k) in self.live.iter().zip(counts) {
            if k == 0 {
                continue;
            }
            let locus = arena.require_mut(parent)?;
            let missing = || InvariantViolation::MissingProvider(parent.to_string());
            {
                let provider = locus.provider.as_ref().ok_or_else(missing)?;
                for _ in 1..k {
                    staged.push((parent, provider.clone()));
                }
            }
            let last = if self.preserve_ancestral_data || locus.preserve {
                locus.provider.clone()
            } else {
                locus.provider.take()
            };
            staged.push((parent, last.ok_or_else(missing)?));
        }
        Ok(staged)
    }

    /// Remove the childless part of the previous generation.
    fn prune<P>(&mut self, arena: &mut Arena<P>, old: &[NodeId]) -> Result<usize, SimError> {
        for &id in old {
            arena.check_partner(id)?;
        }

        let root = self.root;
        let mut removed = 0;
        for &id in old {
            let Some(locus) = arena.get(id) else {
                continue;
            };
            if locus.offspring.is_empty() && locus.preserve {
                if !self.preserved.contains(&id) {
                    self.preserved.push(id);
                }
                continue;
            }
            removed += arena.prune_upward(id, |candidate| candidate == root)?;
        }
        Ok(removed)
    }

    /// Recompute relative fitness of the live set from cached fitness,
    /// without rescaling providers. Used after migration and founding.
    pub(crate) fn refresh_relative_fitness<P>(&self, arena: &mut Arena<P>) -> Result<(), SimError> {
        if self.live.is_empty() {
            return Ok(());
        }
        let mut total = 0.0;
        for &id in &self.live {
            total += arena.require(id)?.fitness;
        }
        let mean = total / self.live.len() as f64;
        check_mean(mean)?;
        for &id in &self.live {
            let locus = arena.require_mut(id)?;
            locus.relative_fitness = locus.fitness / mean;
        }
        Ok(())
    }

    /// Draw `k` distinct live individuals uniformly without replacement.
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<NodeId>, SimError> {
        if k > self.live.len() {
            return Err(SimError::SampleTooLarge {
                requested: k,
                available: self.live.len(),
            });
        }
        Ok(index::sample(rng, self.live.len(), k)
            .into_iter()
            .map(|i| self.live[i])
            .collect())
    }

    /// Remove `count` random individuals from the live set.
    pub(crate) fn take_migrants<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> Vec<NodeId> {
        let count = count.min(self.live.len());
        (0..count)
            .map(|_| {
                let i = rng.random_range(0..self.live.len());
                self.live.swap_remove(i)
            })
            .collect()
    }

    pub(crate) fn receive(&mut self, migrants: impl IntoIterator<Item = NodeId>) {
        self.live.extend(migrants);
    }

    /// Keep `id` and its ancestry through pruning.
    pub fn mark_preserved<P>(&mut self, arena: &mut Arena<P>, id: NodeId) -> Result<(), SimError> {
        arena.require_mut(id)?.preserve = true;
        if !self.preserved.contains(&id) {
            self.preserved.push(id);
        }
        Ok(())
    }

    /// Drop the preservation mark of `id` and prune it if it is dead.
    ///
    /// Returns the number of nodes removed.
    pub fn unmark_preserved<P>(&mut self, arena: &mut Arena<P>, id: NodeId) -> Result<usize, SimError> {
        if let Some(locus) = arena.get_mut(id) {
            locus.preserve = false;
        }
        self.preserved.retain(|&p| p != id);
        if !arena.contains(id) || self.live.contains(&id) {
            return Ok(0);
        }
        let root = self.root;
        Ok(arena.prune_upward(id, |candidate| candidate == root)?)
    }

    /// Unmark every preserved node of this population.
    pub fn release_preserved<P>(&mut self, arena: &mut Arena<P>) -> Result<usize, SimError> {
        let preserved = std::mem::take(&mut self.preserved);
        let mut removed = 0;
        for id in preserved {
            removed += self.unmark_preserved(arena, id)?;
        }
        Ok(removed)
    }

    /// Mean relative fitness of the live set.
    pub fn mean_relative_fitness<P>(&self, arena: &Arena<P>) -> f64 {
        if self.live.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .live
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|locus| locus.relative_fitness)
            .sum();
        total / self.live.len() as f64
    }
}

/// Normalize the fitness of `nodes` by their mean.
///
/// Providers that accumulate fitness are rescaled in place. Returns the mean.
fn normalize<P: FitnessProvider>(arena: &mut Arena<P>, nodes: &[NodeId]) -> Result<f64, SimError> {
    let mut total = 0.0;
    for &id in nodes {
        total += arena.require(id)?.fitness;
    }
    let mean = total / nodes.len() as f64;
    check_mean(mean)?;

    for &id in nodes {
        let locus = arena.require_mut(id)?;
        locus.relative_fitness = locus.fitness / mean;
        if let Some(provider) = locus.provider.as_mut() {
            if provider.scaling() == FitnessScaling::Rescaled {
                provider.rescale(mean);
            }
        }
        locus.sync_fitness();
    }
    Ok(mean)
}

fn check_mean(mean: f64) -> Result<(), SimError> {
    if mean.is_finite() && mean > 0.0 {
        Ok(())
    } else {
        Err(SimError::Domain(format!("mean fitness {mean} is not positive")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{
        EffectKernel, NeutralProvider, QuantitativeParams, QuantitativeProvider,
    };
    use crate::genealogy::Recombination;
    use std::sync::Arc;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn founded<P: FitnessProvider>(
        arena: &mut Arena<P>,
        template: &P,
        size: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Population {
        let root = arena.insert(Locus::ancestor(rng.random(), 0, -1));
        let live = (0..size)
            .map(|_| {
                let id = arena.insert(Locus::new(rng.random(), 0, 0, template.clone()));
                arena.link(root, id).unwrap();
                id
            })
            .collect();
        Population::new(0, live, root, false, true)
    }

    #[test]
    fn test_reproduce_keeps_target_size() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 50, &mut rng);

        let stats = pop.reproduce(&mut arena, 80, &mut rng).unwrap();
        assert_eq!(stats.size, 80);
        assert_eq!(pop.size(), 80);
        assert_eq!(pop.generation(), 1);
        assert!(approx_eq(stats.mean_fitness, 1.0));
    }

    #[test]
    fn test_pruning_bounds_memory() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 20, &mut rng);
        for _ in 0..200 {
            pop.reproduce(&mut arena, 20, &mut rng).unwrap();
        }
        // Every stored node is reachable from the root.
        assert_eq!(arena.reachable_from(pop.root()), arena.len());
        // The root never has exactly one child.
        assert_ne!(arena.get(pop.root()).unwrap().offspring().len(), 1);
        // Live nodes plus their ancestry, far below 201 generations of 20.
        assert!(arena.len() < 1000, "arena holds {} nodes", arena.len());
    }

    #[test]
    fn test_providers_move_to_last_offspring() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 10, &mut rng);
        let old = pop.live().to_vec();
        pop.reproduce(&mut arena, 10, &mut rng).unwrap();

        for id in old {
            if let Some(locus) = arena.get(id) {
                assert!(locus.provider().is_none());
            }
        }
        for &id in pop.live() {
            assert!(arena.get(id).unwrap().provider().is_some());
        }
    }

    #[test]
    fn test_preserve_ancestral_data_keeps_providers() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut arena = Arena::new();
        let root = arena.insert(Locus::ancestor(1, 0, -1));
        let live: Vec<_> = (0..10)
            .map(|i| {
                let id = arena.insert(Locus::new(i, 0, 0, NeutralProvider));
                arena.link(root, id).unwrap();
                id
            })
            .collect();
        let mut pop = Population::new(0, live.clone(), root, true, true);
        pop.reproduce(&mut arena, 10, &mut rng).unwrap();

        for id in live {
            if let Some(locus) = arena.get(id) {
                assert!(locus.provider().is_some());
            }
        }
    }

    #[test]
    fn test_preserved_node_survives() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 10, &mut rng);
        let marked = pop.live()[0];
        pop.mark_preserved(&mut arena, marked).unwrap();

        for _ in 0..50 {
            pop.reproduce(&mut arena, 10, &mut rng).unwrap();
        }
        assert!(arena.contains(marked));
        assert_eq!(pop.preserved(), &[marked]);
        assert_eq!(arena.reachable_from(pop.root()), arena.len());

        pop.release_preserved(&mut arena).unwrap();
        assert!(pop.preserved().is_empty());
        for _ in 0..50 {
            pop.reproduce(&mut arena, 10, &mut rng).unwrap();
        }
        assert_eq!(arena.reachable_from(pop.root()), arena.len());
    }

    #[test]
    fn test_marked_parent_keeps_its_provider() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        let mut arena = Arena::new();
        // A lone founder is the parent of every offspring.
        let mut pop = founded(&mut arena, &NeutralProvider, 1, &mut rng);
        let marked = pop.live()[0];
        pop.mark_preserved(&mut arena, marked).unwrap();

        pop.reproduce(&mut arena, 5, &mut rng).unwrap();
        let locus = arena.get(marked).unwrap();
        assert_eq!(locus.offspring().len(), 5);
        assert!(locus.provider().is_some());

        for _ in 0..30 {
            pop.reproduce(&mut arena, 5, &mut rng).unwrap();
        }
        assert!(arena.get(marked).unwrap().provider().is_some());
    }

    #[test]
    fn test_quantitative_normalization() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let params = Arc::new(QuantitativeParams::new(1.0, EffectKernel::Normal { sd: 0.05 }).unwrap());
        let template = QuantitativeProvider::new(params);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &template, 100, &mut rng);

        for _ in 0..20 {
            pop.reproduce(&mut arena, 100, &mut rng).unwrap();
            assert!(approx_eq(pop.mean_relative_fitness(&arena), 1.0));
            let raw: f64 = pop
                .live()
                .iter()
                .map(|&id| arena.get(id).unwrap().fitness())
                .sum::<f64>()
                / 100.0;
            assert!(approx_eq(raw, 1.0));
        }
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut arena = Arena::new();
        let pop = founded(&mut arena, &NeutralProvider, 30, &mut rng);

        let mut sample = pop.sample(30, &mut rng).unwrap();
        sample.sort();
        sample.dedup();
        assert_eq!(sample.len(), 30);

        let err = pop.sample(31, &mut rng).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_relative_fitness_is_fatal() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 5, &mut rng);
        arena.get_mut(pop.live()[2]).unwrap().relative_fitness = f64::NAN;

        let err = pop.reproduce(&mut arena, 5, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            SimError::Invariant(InvariantViolation::RelativeFitness { .. })
        ));
    }

    #[test]
    fn test_broken_partnership_aborts_reproduction() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 6, &mut rng);

        let (a, b) = (pop.live()[0], pop.live()[1]);
        arena.pair_recombinants(a, b, 0..10).unwrap();
        pop.reproduce(&mut arena, 6, &mut rng).unwrap();

        let (a, b, c) = (pop.live()[0], pop.live()[1], pop.live()[2]);
        arena.pair_recombinants(a, b, 0..10).unwrap();
        arena.get_mut(b).unwrap().partner = Some(Recombination {
            partner: c,
            breakpoint: 0..10,
        });
        let err = pop.reproduce(&mut arena, 6, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            SimError::Invariant(InvariantViolation::AsymmetricPartner { .. })
        ));
    }

    #[test]
    fn test_ceiling_rises_above_two() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut arena = Arena::new();
        let mut pop = founded(&mut arena, &NeutralProvider, 5, &mut rng);
        arena.get_mut(pop.live()[0]).unwrap().relative_fitness = 3.0;

        pop.reproduce(&mut arena, 5, &mut rng).unwrap();
        assert_eq!(pop.ceiling(), 3.0);
    }
}
