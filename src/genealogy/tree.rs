//! Pruned coalescent trees reconstructed from the ancestry graph.
//!
//! A [`SampleTree`] is a standalone copy: it holds labels and branch lengths
//! only and shares no storage with the simulation, so it stays valid while
//! the population keeps evolving.

use std::collections::HashMap;
use std::fmt::Write as _;

use super::{Arena, NodeId};
use crate::errors::{ConfigError, InvariantViolation, SimError};

/// Default cap on the number of lineage steps taken by [`SampleTree::build`].
pub const MAX_TREE_ITERATIONS: usize = 1_000_000;

/// A node of a [`SampleTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub label: String,
    /// Birth generation of the ancestral node this copies.
    pub birth: i64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Generations between this node and its parent.
    pub branch_length: u64,
    pub is_sample: bool,
}

/// A rooted tree over a sample of live individuals.
///
/// Internal nodes are the real common ancestors at which two or more sampled
/// lineages meet; ancestors on a single lineage are not copied.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTree {
    nodes: Vec<TreeNode>,
    root: usize,
}

impl SampleTree {
    /// Trace `samples` back through `arena` until one lineage remains.
    ///
    /// Lineages are stepped to their parents youngest first; lineages that
    /// land on the same parent coalesce into one tree node. Gives up with
    /// [`SimError::NoCommonAncestor`] after `max_iterations` steps.
    pub fn build<P>(
        arena: &Arena<P>,
        samples: &[NodeId],
        multi_population: bool,
        max_iterations: usize,
    ) -> Result<Self, SimError> {
        if samples.is_empty() {
            return Err(ConfigError::InvalidParameter(
                "a sample tree needs at least one sample".into(),
            )
            .into());
        }

        let mut nodes = Vec::with_capacity(2 * samples.len());
        // Real node a lineage has reached -> tree node at the top of it.
        let mut frontier: HashMap<NodeId, usize> = HashMap::with_capacity(samples.len());
        // Real node each tree node copies.
        let mut sources: Vec<NodeId> = Vec::with_capacity(2 * samples.len());

        for &sample in samples {
            let locus = arena.require(sample)?;
            if frontier.contains_key(&sample) {
                continue;
            }
            frontier.insert(sample, nodes.len());
            sources.push(sample);
            nodes.push(TreeNode {
                label: locus.label(multi_population),
                birth: locus.birth(),
                parent: None,
                children: Vec::new(),
                branch_length: 0,
                is_sample: true,
            });
        }

        let mut iterations = 0;
        while frontier.len() > 1 {
            if iterations >= max_iterations {
                return Err(SimError::NoCommonAncestor { iterations });
            }
            iterations += 1;

            let mut youngest_birth = i64::MIN;
            for &real in frontier.keys() {
                youngest_birth = youngest_birth.max(arena.require(real)?.birth());
            }
            let mut youngest: Vec<NodeId> = frontier
                .keys()
                .copied()
                .filter(|&real| arena.get(real).is_some_and(|l| l.birth() == youngest_birth))
                .collect();
            youngest.sort_unstable();

            for real in youngest {
                let Some(lineage) = frontier.remove(&real) else {
                    continue;
                };
                let parent = arena
                    .require(real)?
                    .parent()
                    .ok_or_else(|| InvariantViolation::MissingParent(real.to_string()))?;

                match frontier.get(&parent).copied() {
                    None => {
                        frontier.insert(parent, lineage);
                    }
                    Some(existing) if sources[existing] == parent => {
                        nodes[existing].children.push(lineage);
                        nodes[lineage].parent = Some(existing);
                    }
                    Some(other) => {
                        let locus = arena.require(parent)?;
                        let merged = nodes.len();
                        nodes.push(TreeNode {
                            label: locus.label(multi_population),
                            birth: locus.birth(),
                            parent: None,
                            children: vec![other, lineage],
                            branch_length: 0,
                            is_sample: false,
                        });
                        sources.push(parent);
                        nodes[other].parent = Some(merged);
                        nodes[lineage].parent = Some(merged);
                        frontier.insert(parent, merged);
                    }
                }
            }
        }

        let root = frontier
            .values()
            .next()
            .copied()
            .ok_or_else(|| SimError::Domain("sample tree lost every lineage".into()))?;

        for index in 0..nodes.len() {
            if let Some(parent) = nodes[index].parent {
                nodes[index].branch_length = (nodes[index].birth - nodes[parent].birth) as u64;
            }
        }

        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> Option<&TreeNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of the sampled nodes.
    pub fn samples(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_sample)
            .map(|(index, _)| index)
    }

    /// Generations from the youngest sample up to the root.
    pub fn height(&self) -> u64 {
        let root_birth = self.nodes[self.root].birth;
        self.nodes
            .iter()
            .map(|node| (node.birth - root_birth) as u64)
            .max()
            .unwrap_or(0)
    }

    /// Render in Newick notation with branch lengths in generations.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_newick(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, index: usize, out: &mut String) {
        let node = &self.nodes[index];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(child, out);
            }
            out.push(')');
        }
        out.push_str(&node.label);
        if node.parent.is_some() {
            let _ = write!(out, ":{}", node.branch_length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::NeutralProvider;
    use crate::genealogy::Locus;

    /// root(-1) -> a(0), b(0); a -> a1(1), a2(1); b -> b1(1)
    fn small_arena() -> (Arena<NeutralProvider>, [NodeId; 3]) {
        let mut arena = Arena::new();
        let root = arena.insert(Locus::ancestor(0x10, 0, -1));
        let a = arena.insert(Locus::new(0xa, 0, 0, NeutralProvider));
        let b = arena.insert(Locus::new(0xb, 0, 0, NeutralProvider));
        let a1 = arena.insert(Locus::new(0xa1, 0, 1, NeutralProvider));
        let a2 = arena.insert(Locus::new(0xa2, 0, 1, NeutralProvider));
        let b1 = arena.insert(Locus::new(0xb1, 0, 1, NeutralProvider));
        arena.link(root, a).unwrap();
        arena.link(root, b).unwrap();
        arena.link(a, a1).unwrap();
        arena.link(a, a2).unwrap();
        arena.link(b, b1).unwrap();
        (arena, [a1, a2, b1])
    }

    #[test]
    fn test_tree_coalesces_and_splices() {
        let (arena, [a1, a2, b1]) = small_arena();
        let tree = SampleTree::build(&arena, &[a1, a2, b1], false, MAX_TREE_ITERATIONS).unwrap();

        // Three samples, the a-node and the root. b is unary and skipped.
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.samples().count(), 3);
        assert_eq!(tree.height(), 2);
        assert_eq!(
            tree.to_newick(),
            "((000000a1:1,000000a2:1)0000000a:1,000000b1:2)00000010;"
        );
    }

    #[test]
    fn test_single_sample() {
        let (arena, [a1, _, _]) = small_arena();
        let tree = SampleTree::build(&arena, &[a1], false, MAX_TREE_ITERATIONS).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.to_newick(), "000000a1;");
    }

    #[test]
    fn test_iteration_cap_is_recoverable() {
        let (arena, [a1, _, b1]) = small_arena();
        let err = SampleTree::build(&arena, &[a1, b1], false, 1).unwrap_err();
        assert!(matches!(err, SimError::NoCommonAncestor { iterations: 1 }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_disconnected_samples_fail() {
        let mut arena: Arena<NeutralProvider> = Arena::new();
        let x = arena.insert(Locus::new(1, 0, 0, NeutralProvider));
        let y = arena.insert(Locus::new(2, 0, 0, NeutralProvider));
        let err = SampleTree::build(&arena, &[x, y], false, MAX_TREE_ITERATIONS).unwrap_err();
        assert!(matches!(
            err,
            SimError::Invariant(InvariantViolation::MissingParent(_))
        ));
    }
}
