//! Demographic models.
//!
//! [`SizePolicy`] is a pure schedule of population sizes. [`DemographicModel`]
//! is the serializable description of a run's structure, and [`Demography`]
//! is its runtime state: the shared genealogy arena, the populations, and the
//! root that every live individual descends from.
//!
//! Multi-population models hang each population's founders under a
//! synthetic global root, so root shortening sees the whole genealogy at
//! once and every population reports that same root.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, trace};
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use super::population::{GenerationStats, Population};
use crate::base::Sequence;
use crate::errors::{ConfigError, InvariantViolation, SimError};
use crate::evolution::FitnessProvider;
use crate::genealogy::{Arena, Locus, NodeId, SampleTree};

/// Largest population a size schedule may ask for.
pub const MAX_POPULATION_SIZE: usize = u32::MAX as usize;

/// Population size as a function of the generation number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizePolicy {
    Constant {
        size: usize,
    },
    /// `base_size + rate * t`, where `t` restarts every `period` generations.
    LinearGrowth {
        base_size: usize,
        rate: f64,
        #[serde(default)]
        period: Option<usize>,
    },
    /// `base_size * exp(rate * t)`. Within each period, `t` only advances
    /// inside `[delay, max_generation)`; size is frozen outside it.
    ExponentialGrowth {
        base_size: usize,
        rate: f64,
        #[serde(default)]
        period: Option<usize>,
        #[serde(default)]
        delay: usize,
        #[serde(default)]
        max_generation: Option<usize>,
    },
    /// `bottleneck_size` while `generation % frequency < duration`, else
    /// `base_size`.
    Bottleneck {
        base_size: usize,
        bottleneck_size: usize,
        frequency: usize,
        duration: usize,
    },
}

impl SizePolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = |what: &str, size: usize| {
            if size == 0 || size > MAX_POPULATION_SIZE {
                Err(ConfigError::InvalidPopulationSize(format!(
                    "{what} must be between 1 and {MAX_POPULATION_SIZE}"
                )))
            } else {
                Ok(())
            }
        };
        let finite = |name: &'static str, value: f64| {
            if value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { name, value })
            }
        };
        let period_ok = |period: Option<usize>| {
            if period == Some(0) {
                Err(ConfigError::InvalidParameter("period must be at least 1".into()))
            } else {
                Ok(())
            }
        };
        match *self {
            SizePolicy::Constant { size } => nonzero("size", size),
            SizePolicy::LinearGrowth {
                base_size,
                rate,
                period,
            } => {
                nonzero("base_size", base_size)?;
                finite("rate", rate)?;
                period_ok(period)
            }
            SizePolicy::ExponentialGrowth {
                base_size,
                rate,
                period,
                delay,
                max_generation,
            } => {
                nonzero("base_size", base_size)?;
                finite("rate", rate)?;
                period_ok(period)?;
                match max_generation {
                    Some(max) if max < delay => Err(ConfigError::InvalidParameter(format!(
                        "growth window [{delay}, {max}) is empty"
                    ))),
                    _ => Ok(()),
                }
            }
            SizePolicy::Bottleneck {
                base_size,
                bottleneck_size,
                frequency,
                duration,
            } => {
                nonzero("base_size", base_size)?;
                nonzero("bottleneck_size", bottleneck_size)?;
                if frequency == 0 || duration > frequency {
                    return Err(ConfigError::InvalidParameter(format!(
                        "bottleneck duration {duration} does not fit frequency {frequency}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Target size of `generation`. Never below one.
    pub fn size_at(&self, generation: usize) -> usize {
        let local = |period: Option<usize>| match period {
            Some(p) if p > 0 => generation % p,
            _ => generation,
        };
        let size = match *self {
            SizePolicy::Constant { size } => size,
            SizePolicy::LinearGrowth {
                base_size,
                rate,
                period,
            } => (base_size as f64 + rate * local(period) as f64).round() as usize,
            SizePolicy::ExponentialGrowth {
                base_size,
                rate,
                period,
                delay,
                max_generation,
            } => {
                let t = local(period).clamp(delay, max_generation.unwrap_or(usize::MAX).max(delay));
                let elapsed = (t - delay) as f64;
                (base_size as f64 * (rate * elapsed).exp()).round() as usize
            }
            SizePolicy::Bottleneck {
                base_size,
                bottleneck_size,
                frequency,
                duration,
            } => {
                if frequency > 0 && generation % frequency < duration {
                    bottleneck_size
                } else {
                    base_size
                }
            }
        };
        size.max(1)
    }

    /// [`size_at`](Self::size_at), refusing sizes above
    /// [`MAX_POPULATION_SIZE`]. Unbounded growth schedules end here.
    pub fn checked_size_at(&self, generation: usize) -> Result<usize, SimError> {
        let size = self.size_at(generation);
        if size > MAX_POPULATION_SIZE {
            return Err(SimError::Domain(format!(
                "size schedule outgrew {MAX_POPULATION_SIZE} individuals at generation {generation}"
            )));
        }
        Ok(size)
    }
}

/// Serializable description of a run's population structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DemographicModel {
    /// One population following a size schedule.
    Single { policy: SizePolicy },
    /// Equal, constant-size demes exchanging migrants at rate
    /// `migration_rate` per ordered pair.
    Island {
        populations: usize,
        size: usize,
        migration_rate: f64,
    },
    /// One ancestral population that splits into two at `split_generation`.
    Split {
        ancestral_size: usize,
        split_generation: usize,
        sizes: [usize; 2],
        #[serde(default)]
        m12: f64,
        #[serde(default)]
        m21: f64,
    },
}

impl DemographicModel {
    /// Short name used in logs and error attribution.
    pub fn name(&self) -> &'static str {
        match self {
            DemographicModel::Single { .. } => "single",
            DemographicModel::Island { .. } => "island",
            DemographicModel::Split { .. } => "split",
        }
    }

    /// Whether individuals are labelled with their origin population.
    pub fn is_multi_population(&self) -> bool {
        !matches!(self, DemographicModel::Single { .. })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = |name: &'static str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidRate { name, value })
            }
        };
        match self {
            DemographicModel::Single { policy } => policy.validate(),
            DemographicModel::Island {
                populations,
                size,
                migration_rate,
            } => {
                if *populations == 0 || *size == 0 || *size > MAX_POPULATION_SIZE {
                    return Err(ConfigError::InvalidPopulationSize(format!(
                        "island model needs at least one deme of at least one individual, got {populations} x {size}"
                    )));
                }
                rate("migration_rate", *migration_rate)
            }
            DemographicModel::Split {
                ancestral_size,
                sizes,
                m12,
                m21,
                ..
            } => {
                if *ancestral_size == 0 || *ancestral_size > MAX_POPULATION_SIZE || sizes.contains(&0)
                {
                    return Err(ConfigError::InvalidPopulationSize(format!(
                        "split model sizes must be between 1 and {MAX_POPULATION_SIZE}"
                    )));
                }
                if sizes[0].saturating_add(sizes[1]) > *ancestral_size {
                    return Err(ConfigError::InvalidPopulationSize(format!(
                        "cannot found populations of {} and {} from {} ancestral individuals",
                        sizes[0], sizes[1], ancestral_size
                    )));
                }
                rate("m12", *m12)?;
                rate("m21", *m21)
            }
        }
    }
}

/// Phase of a split model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPhase {
    PreSplit,
    PostSplit,
}

/// Result of one generation advance.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub generation: usize,
    pub populations: Vec<GenerationStats>,
}

impl GenerationReport {
    /// Offspring whose mutation was abandoned, over all populations.
    pub fn skipped_mutations(&self) -> usize {
        self.populations.iter().map(|p| p.skipped_mutations).sum()
    }
}

/// Runtime state of a demographic model.
#[derive(Debug, Clone)]
pub struct Demography<P> {
    model: DemographicModel,
    arena: Arena<P>,
    populations: Vec<Population>,
    root: NodeId,
    generation: usize,
    phase: Option<SplitPhase>,
    preserve_ancestral_data: bool,
    auto_shorten_root: bool,
}

impl<P: FitnessProvider> Demography<P> {
    /// Found the populations of `model` with clones of `template`.
    pub fn new<R: Rng + ?Sized>(
        model: DemographicModel,
        template: &P,
        preserve_ancestral_data: bool,
        auto_shorten_root: bool,
        rng: &mut R,
    ) -> Result<Self, SimError> {
        model.validate()?;

        let mut arena = Arena::new();
        let mut populations = Vec::new();
        let mut phase = None;

        let root = match &model {
            DemographicModel::Single { policy } => {
                let root = arena.insert(Locus::ancestor(rng.random(), 0, -1));
                let live = found(&mut arena, root, 0, policy.checked_size_at(0)?, template, rng)?;
                populations.push(Population::new(0, live, root, preserve_ancestral_data, false));
                root
            }
            DemographicModel::Split { ancestral_size, .. } => {
                let root = arena.insert(Locus::ancestor(rng.random(), 0, -1));
                let live = found(&mut arena, root, 0, *ancestral_size, template, rng)?;
                populations.push(Population::new(0, live, root, preserve_ancestral_data, false));
                phase = Some(SplitPhase::PreSplit);
                root
            }
            DemographicModel::Island {
                populations: demes,
                size,
                ..
            } => {
                let global = arena.insert(Locus::ancestor(rng.random(), 0, -2));
                for index in 0..*demes {
                    let founder = arena.insert(Locus::ancestor(rng.random(), index as u32, -1));
                    arena.link(global, founder)?;
                    let live = found(&mut arena, founder, index, *size, template, rng)?;
                    populations.push(Population::new(
                        index,
                        live,
                        global,
                        preserve_ancestral_data,
                        false,
                    ));
                }
                global
            }
        };

        let mut demography = Self {
            model,
            arena,
            populations,
            root,
            generation: 0,
            phase,
            preserve_ancestral_data,
            auto_shorten_root,
        };
        demography.shorten_root()?;
        Ok(demography)
    }

    /// Advance every population by one generation.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<GenerationReport, SimError> {
        let next = self.generation + 1;
        let name = self.model.name();

        if self.phase == Some(SplitPhase::PreSplit) {
            if let DemographicModel::Split {
                split_generation,
                sizes,
                ..
            } = self.model
            {
                if self.generation >= split_generation {
                    self.split(sizes, rng).map_err(|e| e.in_generation(name, 0, next))?;
                }
            }
        }

        self.migrate(rng)?;

        let mut stats = Vec::with_capacity(self.populations.len());
        for position in 0..self.populations.len() {
            let index = self.populations[position].index();
            let target = self
                .target_size(position, next)
                .map_err(|e| e.in_generation(name, index, next))?;
            let result = self.populations[position]
                .reproduce(&mut self.arena, target, rng)
                .map_err(|e| e.in_generation(name, index, next))?;
            stats.push(result);
        }

        self.shorten_root().map_err(|e| e.in_generation(name, 0, next))?;
        self.generation = next;
        for population in &mut self.populations {
            population.set_generation(next);
        }

        debug!(
            "generation {next} ({name}): sizes {:?}, mean fitness {:?}, {} nodes",
            stats.iter().map(|s| s.size).collect::<Vec<_>>(),
            stats.iter().map(|s| s.mean_fitness).collect::<Vec<_>>(),
            self.arena.len()
        );

        Ok(GenerationReport {
            generation: next,
            populations: stats,
        })
    }

    fn target_size(&self, position: usize, generation: usize) -> Result<usize, SimError> {
        let size = match &self.model {
            DemographicModel::Single { policy } => policy.checked_size_at(generation)?,
            DemographicModel::Island { size, .. } => *size,
            DemographicModel::Split {
                ancestral_size,
                sizes,
                ..
            } => match self.phase {
                Some(SplitPhase::PostSplit) => sizes[position],
                _ => *ancestral_size,
            },
        };
        Ok(size)
    }

    /// Per-individual migration probability from `from` to `to`.
    fn migration_rate(&self, from: usize, to: usize) -> f64 {
        match (&self.model, self.phase) {
            (DemographicModel::Island { migration_rate, .. }, _) => *migration_rate,
            (DemographicModel::Split { m12, m21, .. }, Some(SplitPhase::PostSplit)) => {
                match (from, to) {
                    (0, 1) => *m12,
                    (1, 0) => *m21,
                    _ => 0.0,
                }
            }
            _ => 0.0,
        }
    }

    /// Exchange migrants between every ordered pair of populations.
    ///
    /// Each pair moves Poisson(size * rate) individuals; a source always
    /// keeps at least one.
    fn migrate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SimError> {
        let n = self.populations.len();
        if n < 2 {
            return Ok(());
        }

        let mut arriving: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        let mut changed = vec![false; n];
        for from in 0..n {
            let size = self.populations[from].size();
            let mut budget = size.saturating_sub(1);
            for (to, bucket) in arriving.iter_mut().enumerate() {
                let rate = self.migration_rate(from, to);
                if to == from || rate <= 0.0 || budget == 0 {
                    continue;
                }
                let expected = size as f64 * rate;
                let count = Poisson::new(expected)
                    .map(|poisson| poisson.sample(rng) as usize)
                    .unwrap_or(0)
                    .min(budget);
                budget -= count;
                if count == 0 {
                    continue;
                }
                let migrants = self.populations[from].take_migrants(count, rng);
                trace!("generation {}: {count} migrants {from} -> {to}", self.generation);
                bucket.extend(migrants);
                changed[from] = true;
                changed[to] = true;
            }
        }

        let name = self.model.name();
        let next = self.generation + 1;
        for ((population, migrants), changed) in
            self.populations.iter_mut().zip(arriving).zip(changed)
        {
            if !changed {
                continue;
            }
            population.receive(migrants);
            population
                .refresh_relative_fitness(&mut self.arena)
                .map_err(|e| e.in_generation(name, population.index(), next))?;
        }
        Ok(())
    }

    /// Found the two daughter populations from the ancestral generation.
    fn split<R: Rng + ?Sized>(&mut self, sizes: [usize; 2], rng: &mut R) -> Result<(), SimError> {
        let ancestral = self
            .populations
            .pop()
            .ok_or(InvariantViolation::EmptyPopulation(0))?;
        let live = ancestral.live().to_vec();
        let wanted = sizes[0] + sizes[1];
        if wanted > live.len() {
            return Err(ConfigError::InvalidPopulationSize(format!(
                "cannot found {wanted} individuals from {} ancestral individuals",
                live.len()
            ))
            .into());
        }

        let chosen: Vec<NodeId> = index::sample(rng, live.len(), wanted)
            .into_iter()
            .map(|i| live[i])
            .collect();
        let (first, second) = chosen.split_at(sizes[0]);

        let preserved = ancestral.preserved().to_vec();
        let mut daughters = [
            Population::new(1, first.to_vec(), self.root, self.preserve_ancestral_data, false),
            Population::new(2, second.to_vec(), self.root, self.preserve_ancestral_data, false),
        ];
        for daughter in &mut daughters {
            daughter.set_generation(self.generation);
        }
        for id in preserved {
            daughters[0].mark_preserved(&mut self.arena, id)?;
        }

        let root = self.root;
        let mut dropped = 0;
        let kept: HashSet<NodeId> = chosen.iter().copied().collect();
        for id in live.into_iter().filter(|id| !kept.contains(id)) {
            dropped += self.arena.prune_upward(id, |candidate| candidate == root)?;
        }

        for daughter in &daughters {
            daughter.refresh_relative_fitness(&mut self.arena)?;
        }
        self.populations = daughters.into();
        self.phase = Some(SplitPhase::PostSplit);

        info!(
            "split at generation {}: founded {} and {} individuals, {dropped} ancestral nodes pruned",
            self.generation, sizes[0], sizes[1]
        );
        Ok(())
    }

    fn shorten_root(&mut self) -> Result<(), SimError> {
        if self.auto_shorten_root {
            self.root = self.arena.shorten_root(self.root)?;
        }
        for population in &mut self.populations {
            population.set_root(self.root);
        }
        Ok(())
    }

    pub fn model(&self) -> &DemographicModel {
        &self.model
    }

    pub fn arena(&self) -> &Arena<P> {
        &self.arena
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    /// Common ancestor of every live individual.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn phase(&self) -> Option<SplitPhase> {
        self.phase
    }

    pub fn preserve_ancestral_data(&self) -> bool {
        self.preserve_ancestral_data
    }

    pub fn current_size(&self) -> usize {
        self.populations.iter().map(Population::size).sum()
    }

    /// Every live handle, population by population.
    pub fn live(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.populations.iter().flat_map(|p| p.live().iter().copied())
    }

    /// Draw `k` distinct live individuals across all populations.
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<NodeId>, SimError> {
        let live: Vec<NodeId> = self.live().collect();
        if k > live.len() {
            return Err(SimError::SampleTooLarge {
                requested: k,
                available: live.len(),
            });
        }
        Ok(index::sample(rng, live.len(), k)
            .into_iter()
            .map(|i| live[i])
            .collect())
    }

    /// Draw `k` distinct live individuals from the population at `position`.
    pub fn sample_from<R: Rng + ?Sized>(
        &self,
        position: usize,
        k: usize,
        rng: &mut R,
    ) -> Result<Vec<NodeId>, SimError> {
        let population = self.populations.get(position).ok_or_else(|| {
            ConfigError::InvalidParameter(format!(
                "no population at position {position} ({} present)",
                self.populations.len()
            ))
        })?;
        population.sample(k, rng)
    }

    /// Sample `k` individuals and rebuild their genealogy.
    pub fn sample_tree<R: Rng + ?Sized>(
        &self,
        k: usize,
        max_iterations: usize,
        rng: &mut R,
    ) -> Result<SampleTree, SimError> {
        let samples = self.sample(k, rng)?;
        SampleTree::build(
            &self.arena,
            &samples,
            self.model.is_multi_population(),
            max_iterations,
        )
    }

    /// Keep a live individual and its ancestry until it is released.
    pub fn mark_preserved(&mut self, id: NodeId) -> Result<(), SimError> {
        let population = self
            .populations
            .iter_mut()
            .find(|p| p.contains(id))
            .ok_or_else(|| {
                ConfigError::InvalidParameter(format!("{id} is not a live individual"))
            })?;
        population.mark_preserved(&mut self.arena, id)
    }

    /// Release one preserved individual. Returns the number of nodes pruned.
    pub fn unmark_preserved(&mut self, id: NodeId) -> Result<usize, SimError> {
        match self
            .populations
            .iter_mut()
            .find(|p| p.preserved().contains(&id))
        {
            Some(population) => population.unmark_preserved(&mut self.arena, id),
            None => Ok(0),
        }
    }

    /// Release every preserved individual. Returns the number of nodes pruned.
    pub fn release_preserved(&mut self) -> Result<usize, SimError> {
        let mut removed = 0;
        for population in &mut self.populations {
            removed += population.release_preserved(&mut self.arena)?;
        }
        self.shorten_root()?;
        info!(
            "released preserved individuals at generation {}: {removed} nodes pruned",
            self.generation
        );
        Ok(removed)
    }

    /// Score every live individual against a new master sequence.
    pub fn replace_master(&mut self, master: Arc<Sequence>) -> Result<(), SimError> {
        let live: Vec<NodeId> = self.live().collect();
        for id in live {
            let locus = self.arena.require_mut(id)?;
            let provider = locus
                .provider
                .as_mut()
                .ok_or_else(|| InvariantViolation::MissingProvider(id.to_string()))?;
            provider.replace_master(&master)?;
            locus.sync_fitness();
        }
        for population in &self.populations {
            population.refresh_relative_fitness(&mut self.arena)?;
        }
        info!(
            "replaced master sequence at generation {} ({} sites)",
            self.generation,
            master.len()
        );
        Ok(())
    }
}

/// Create `size` founders under `parent`.
fn found<P: FitnessProvider, R: Rng + ?Sized>(
    arena: &mut Arena<P>,
    parent: NodeId,
    origin: usize,
    size: usize,
    template: &P,
    rng: &mut R,
) -> Result<Vec<NodeId>, SimError> {
    let mut live = Vec::with_capacity(size);
    for _ in 0..size {
        let id = arena.insert(Locus::new(rng.random(), origin as u32, 0, template.clone()));
        arena.link(parent, id)?;
        live.push(id);
    }
    Ok(live)
}
