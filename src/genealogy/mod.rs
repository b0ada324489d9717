//! Genealogy tracking.
//!
//! Every individual ever created is a [`Locus`] in an [`Arena`]. Parent,
//! offspring and recombination-partner links are [`NodeId`] handles, so the
//! graph has no ownership cycles. Lineages that leave no descendants are
//! pruned each generation, which keeps memory proportional to the live
//! population plus its ancestry.

mod arena;
mod locus;
pub mod tree;

pub use arena::{Arena, Lineage, NodeId};
pub use locus::{Locus, Recombination};
pub use tree::{SampleTree, TreeNode, MAX_TREE_ITERATIONS};
