use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use slab::Slab;

use super::{Locus, Recombination};
use crate::errors::InvariantViolation;

/// Handle to a node in an [`Arena`].
///
/// Slots are reused after removal; the stamp tells a stale handle apart
/// from the node that now lives in its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    stamp: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.stamp)
    }
}

#[derive(Debug, Clone)]
struct Slot<P> {
    stamp: u32,
    locus: Locus<P>,
}

/// Storage for every node of one simulation's ancestry graph.
#[derive(Debug, Clone)]
pub struct Arena<P> {
    slots: Slab<Slot<P>>,
    next_stamp: u32,
}

impl<P> Default for Arena<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Arena<P> {
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_stamp: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            next_stamp: 0,
        }
    }

    /// Number of nodes currently stored.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn insert(&mut self, locus: Locus<P>) -> NodeId {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);
        let index = self.slots.insert(Slot { stamp, locus });
        NodeId {
            index: index as u32,
            stamp,
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Locus<P>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.stamp == id.stamp)
            .map(|slot| &slot.locus)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Locus<P>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.stamp == id.stamp)
            .map(|slot| &mut slot.locus)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Like [`get`](Self::get), for handles that must be live.
    pub fn require(&self, id: NodeId) -> Result<&Locus<P>, InvariantViolation> {
        self.get(id)
            .ok_or_else(|| InvariantViolation::StaleHandle(id.to_string()))
    }

    pub fn require_mut(&mut self, id: NodeId) -> Result<&mut Locus<P>, InvariantViolation> {
        self.get_mut(id)
            .ok_or_else(|| InvariantViolation::StaleHandle(id.to_string()))
    }

    /// Iterate over all stored nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Locus<P>)> + '_ {
        self.slots.iter().map(|(index, slot)| {
            (
                NodeId {
                    index: index as u32,
                    stamp: slot.stamp,
                },
                &slot.locus,
            )
        })
    }

    /// Make `child` the next offspring of `parent`.
    pub fn link(&mut self, parent: NodeId, child: NodeId) -> Result<(), InvariantViolation> {
        self.require(child)?;
        self.require_mut(parent)?.offspring.push(child);
        self.require_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Record that `a` and `b` exchanged the sites in `breakpoint`.
    ///
    /// The Wright-Fisher advance is clonal and never calls this; partnerships
    /// come from the caller. Pruning checks their symmetry every generation.
    pub fn pair_recombinants(
        &mut self,
        a: NodeId,
        b: NodeId,
        breakpoint: Range<usize>,
    ) -> Result<(), InvariantViolation> {
        self.require(b)?;
        self.require_mut(a)?.partner = Some(Recombination {
            partner: b,
            breakpoint: breakpoint.clone(),
        });
        self.require_mut(b)?.partner = Some(Recombination {
            partner: a,
            breakpoint,
        });
        Ok(())
    }

    /// Check that the partner of `id`, if any, points back at it.
    pub fn check_partner(&self, id: NodeId) -> Result<(), InvariantViolation> {
        let locus = self.require(id)?;
        let Some(recombination) = &locus.partner else {
            return Ok(());
        };
        let points_back = self
            .get(recombination.partner)
            .and_then(|partner| partner.partner.as_ref())
            .is_some_and(|back| back.partner == id);
        if points_back {
            Ok(())
        } else {
            Err(InvariantViolation::AsymmetricPartner {
                node: id.to_string(),
            })
        }
    }

    /// Remove a node, detaching it from its parent and its partner.
    ///
    /// Offspring of the removed node are left with a dangling parent handle;
    /// callers only remove childless nodes or roots.
    pub fn remove(&mut self, id: NodeId) -> Option<Locus<P>> {
        self.get(id)?;
        let locus = self.slots.remove(id.index as usize).locus;

        if let Some(parent) = locus.parent.and_then(|p| self.get_mut(p)) {
            parent.offspring.retain(|&child| child != id);
        }
        if let Some(recombination) = &locus.partner {
            if let Some(partner) = self.get_mut(recombination.partner) {
                if partner.partner.as_ref().is_some_and(|r| r.partner == id) {
                    partner.partner = None;
                }
            }
        }
        Some(locus)
    }

    /// Remove `start` if it is childless and not kept, then walk up through
    /// ancestors left childless by the removal.
    ///
    /// `keep` is consulted for every candidate; preserved nodes are always
    /// kept. Returns the number of nodes removed.
    pub fn prune_upward<F>(&mut self, start: NodeId, keep: F) -> Result<usize, InvariantViolation>
    where
        F: Fn(NodeId) -> bool,
    {
        let mut removed = 0;
        let mut current = start;
        loop {
            let locus = self.require(current)?;
            if !locus.offspring.is_empty() || locus.preserve || keep(current) {
                return Ok(removed);
            }
            let parent = locus.parent;
            self.remove(current);
            removed += 1;
            match parent {
                Some(parent) => current = parent,
                None => return Ok(removed),
            }
        }
    }

    /// Drop the root while it has exactly one child and is not preserved.
    ///
    /// Returns the new root.
    pub fn shorten_root(&mut self, mut root: NodeId) -> Result<NodeId, InvariantViolation> {
        loop {
            let locus = self.require(root)?;
            if locus.offspring.len() != 1 || locus.preserve {
                return Ok(root);
            }
            let child = locus.offspring[0];
            self.remove(root);
            self.require_mut(child)?.parent = None;
            root = child;
        }
    }

    /// Walk parent links from `id` to its root, starting with `id` itself.
    pub fn lineage(&self, id: NodeId) -> Lineage<'_, P> {
        Lineage {
            arena: self,
            next: self.contains(id).then_some(id),
        }
    }

    /// Number of nodes reachable from `root` through offspring links.
    pub fn reachable_from(&self, root: NodeId) -> usize {
        let mut count = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(locus) = self.get(id) {
                count += 1;
                stack.extend_from_slice(&locus.offspring);
            }
        }
        count
    }
}

/// Iterator over a node and its ancestors.
pub struct Lineage<'a, P> {
    arena: &'a Arena<P>,
    next: Option<NodeId>,
}

impl<P> Iterator for Lineage<'_, P> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self
            .arena
            .get(current)
            .and_then(|locus| locus.parent)
            .filter(|&parent| self.arena.contains(parent));
        Some(current)
    }
}
