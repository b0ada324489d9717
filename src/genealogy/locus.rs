use std::ops::Range;

use super::NodeId;
use crate::evolution::FitnessProvider;

/// Recombination bookkeeping: the partner lineage and the half-open
/// interval `[start, end)` of sites inherited from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recombination {
    pub partner: NodeId,
    pub breakpoint: Range<usize>,
}

/// One node of the ancestry graph.
///
/// A node owns a fitness provider until it hands it on to its last
/// offspring. Links to other nodes are arena handles, never references.
#[derive(Debug, Clone)]
pub struct Locus<P> {
    pub(crate) id: u64,
    pub(crate) origin: u32,
    pub(crate) birth: i64,
    pub(crate) provider: Option<P>,
    pub(crate) fitness: f64,
    pub(crate) relative_fitness: f64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) offspring: Vec<NodeId>,
    pub(crate) partner: Option<Recombination>,
    pub(crate) preserve: bool,
}

impl<P: FitnessProvider> Locus<P> {
    /// A node carrying `provider`, born in generation `birth` of population
    /// `origin`.
    pub fn new(id: u64, origin: u32, birth: i64, provider: P) -> Self {
        let fitness = provider.fitness();
        Self {
            id,
            origin,
            birth,
            provider: Some(provider),
            fitness,
            relative_fitness: 1.0,
            parent: None,
            offspring: Vec::new(),
            partner: None,
            preserve: false,
        }
    }

    /// A bookkeeping ancestor with no provider of its own.
    pub fn ancestor(id: u64, origin: u32, birth: i64) -> Self {
        Self {
            id,
            origin,
            birth,
            provider: None,
            fitness: 1.0,
            relative_fitness: 1.0,
            parent: None,
            offspring: Vec::new(),
            partner: None,
            preserve: false,
        }
    }

    /// Refresh the cached fitness from the provider.
    pub(crate) fn sync_fitness(&mut self) {
        if let Some(provider) = &self.provider {
            self.fitness = provider.fitness();
        }
    }
}

impl<P> Locus<P> {
    /// Random 64-bit identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the population the node was born in.
    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Generation the node was born in. Synthetic ancestors above the first
    /// generation have negative values.
    pub fn birth(&self) -> i64 {
        self.birth
    }

    pub fn provider(&self) -> Option<&P> {
        self.provider.as_ref()
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    /// Fitness divided by the population mean at the last normalization.
    pub fn relative_fitness(&self) -> f64 {
        self.relative_fitness
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn offspring(&self) -> &[NodeId] {
        &self.offspring
    }

    pub fn partner(&self) -> Option<&Recombination> {
        self.partner.as_ref()
    }

    pub fn is_preserved(&self) -> bool {
        self.preserve
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Human-readable identifier: the low 32 bits of the id in hex, with the
    /// origin population appended in multi-population runs.
    pub fn label(&self, multi_population: bool) -> String {
        let short = self.id as u32;
        if multi_population {
            format!("{short:08x}.p{}", self.origin)
        } else {
            format!("{short:08x}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{NeutralProvider, TwoAlleleParams, TwoAlleleProvider, Allele};
    use std::sync::Arc;

    #[test]
    fn test_new_locus_caches_fitness() {
        let params = Arc::new(TwoAlleleParams::new(0.0, 0.0, 0.5).unwrap());
        let locus = Locus::new(7, 0, 3, TwoAlleleProvider::new(Allele::Derived, params));
        assert_eq!(locus.fitness(), 0.5);
        assert_eq!(locus.relative_fitness(), 1.0);
        assert!(locus.is_root());
        assert!(locus.offspring().is_empty());
        assert_eq!(locus.birth(), 3);
    }

    #[test]
    fn test_labels() {
        let locus = Locus::new(0xdead_beef_0000_00ab, 2, 0, NeutralProvider);
        assert_eq!(locus.label(false), "000000ab");
        assert_eq!(locus.label(true), "000000ab.p2");
    }

    #[test]
    fn test_ancestor_has_no_provider() {
        let locus: Locus<NeutralProvider> = Locus::ancestor(1, 0, -1);
        assert!(locus.provider().is_none());
        assert_eq!(locus.birth(), -1);
    }
}
