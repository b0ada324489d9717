//! Read-only views of simulation state.
//!
//! Views copy what they show, so they stay valid after the simulation
//! advances and can be handed to output code on another thread.

use serde::{Deserialize, Serialize};

use super::demography::{DemographicModel, Demography, SplitPhase};
use crate::evolution::FitnessProvider;
use crate::genealogy::{Locus, NodeId};

/// One individual as seen from outside the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualView {
    pub id: NodeId,
    /// `"{id:08x}"`, with `.p{origin}` appended in multi-population runs.
    pub label: String,
    pub origin: u32,
    pub birth: i64,
    pub fitness: f64,
    pub relative_fitness: f64,
    /// Rendered substrate; `None` once the provider was handed on.
    pub substrate: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub preserved: bool,
}

impl IndividualView {
    pub(crate) fn new<P: FitnessProvider>(id: NodeId, locus: &Locus<P>, multi_population: bool) -> Self {
        Self {
            id,
            label: locus.label(multi_population),
            origin: locus.origin(),
            birth: locus.birth(),
            fitness: locus.fitness(),
            relative_fitness: locus.relative_fitness(),
            substrate: locus.provider().map(|p| p.substrate().to_string()),
            parent: locus.parent(),
            children: locus.offspring().to_vec(),
            preserved: locus.is_preserved(),
        }
    }
}

/// Composition of one population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub index: usize,
    pub size: usize,
    pub mean_fitness: f64,
    pub individuals: Vec<IndividualView>,
}

/// Model parameters, generation and population composition of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub model: DemographicModel,
    pub generation: usize,
    pub phase: Option<SplitPhase>,
    /// Label of the common ancestor of every live individual.
    pub root: String,
    /// Nodes held by the genealogy, live individuals included.
    pub genealogy_size: usize,
    pub populations: Vec<PopulationSnapshot>,
}

impl SimulationSnapshot {
    pub(crate) fn capture<P: FitnessProvider>(demography: &Demography<P>) -> Self {
        let multi = demography.model().is_multi_population();
        let arena = demography.arena();
        let populations = demography
            .populations()
            .iter()
            .map(|population| PopulationSnapshot {
                index: population.index(),
                size: population.size(),
                mean_fitness: population.mean_fitness(),
                individuals: population
                    .live()
                    .iter()
                    .filter_map(|&id| arena.get(id).map(|locus| IndividualView::new(id, locus, multi)))
                    .collect(),
            })
            .collect();

        Self {
            model: demography.model().clone(),
            generation: demography.generation(),
            phase: demography.phase(),
            root: arena
                .get(demography.root())
                .map(|locus| locus.label(multi))
                .unwrap_or_default(),
            genealogy_size: arena.len(),
            populations,
        }
    }

    pub fn total_size(&self) -> usize {
        self.populations.iter().map(|p| p.size).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
