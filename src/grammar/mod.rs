//! Mutation grammar: the one-step neighbourhood of a kernel expression.
//!
//! Every leaf of a tree is a mutation site. At each site the grammar
//! proposes:
//!
//! - **REPLACE** the leaf with every other base kernel,
//! - **EXPAND** the leaf into `op(leaf, base)` for every operator and base,
//! - **REMOVE** the leaf, unless it is the top-level node.
//!
//! Candidates are produced lazily, one independent clone at a time, and are
//! not simplified.


use core::fmt;

use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::kernel::{BaseKind, CombRule, Leaf};
use crate::tree::{KernelTree, NodeId};

/// Default catalog: every base kernel and both operators.
pub static DEFAULT_GRAMMAR: Lazy<Grammar> = Lazy::new(Grammar::default);

/// Ordered catalogs of base kernels and combination rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grammar {
    pub bases: Vec<BaseKind>,
    pub operators: Vec<CombRule>,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            bases: BaseKind::ALL.to_vec(),
            operators: CombRule::ALL.to_vec(),
        }
    }
}

impl Grammar {
    pub fn new(bases: Vec<BaseKind>, operators: Vec<CombRule>) -> Self {
        Self { bases, operators }
    }

    /// One single-leaf tree per base kernel.
    pub fn seeds(&self) -> Vec<KernelTree> {
        self.bases.iter().map(|&kind| KernelTree::leaf(kind)).collect()
    }

    /// Lazy neighbourhood of `tree`. Each call starts a fresh traversal.
    pub fn neighbors<'a>(&'a self, tree: &'a KernelTree) -> Neighbors<'a> {
        let sites = tree
            .iter()
            .enumerate()
            .filter(|&(_, id)| !tree.is_operator(id))
            .collect();
        Neighbors {
            grammar: self,
            source: tree,
            sites,
            next_site: 0,
            pending: Vec::new().into_iter(),
        }
    }

    /// Size of the neighbourhood of `tree`, without building it.
    pub fn neighbor_count(&self, tree: &KernelTree) -> usize {
        tree.iter()
            .filter_map(|id| tree.leaf_at(id).map(|leaf| (id, leaf.kind())))
            .map(|(id, kind)| {
                let replace = self.bases.iter().filter(|&&b| b != kind).count();
                let expand = self.bases.len() * self.operators.len();
                let remove = usize::from(!tree.is_toplevel(id));
                replace + expand + remove
            })
            .sum()
    }

    fn site_moves(&self, tree: &KernelTree, site: usize, id: NodeId) -> Vec<Mutation> {
        let Some(leaf) = tree.leaf_at(id) else {
            return Vec::new();
        };
        let own = leaf.kind();
        let mut moves = Vec::with_capacity(self.bases.len() * (self.operators.len() + 1) + 1);
        moves.extend(
            self.bases
                .iter()
                .filter(|&&b| b != own)
                .map(|&with| Mutation::Replace { site, with }),
        );
        for &rule in &self.operators {
            moves.extend(
                self.bases
                    .iter()
                    .map(|&with| Mutation::Expand { site, rule, with }),
            );
        }
        if !tree.is_toplevel(id) {
            moves.push(Mutation::Remove { site });
        }
        moves
    }
}

/// A single grammar rule application. `site` is the post-order index of
/// the mutated leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Replace { site: usize, with: BaseKind },
    Expand { site: usize, rule: CombRule, with: BaseKind },
    Remove { site: usize },
}

impl Mutation {
    pub fn site(&self) -> usize {
        match *self {
            Self::Replace { site, .. } | Self::Expand { site, .. } | Self::Remove { site } => site,
        }
    }

    /// Apply to a clone of `tree`. The source is never modified.
    pub fn apply(&self, tree: &KernelTree) -> Result<KernelTree, KernelError> {
        let site = self.site();
        let mut out = tree.clone();
        let target = out
            .iter()
            .nth(site)
            .filter(|&id| !out.is_operator(id))
            .ok_or(KernelError::InvalidSite(site))?;
        match *self {
            Self::Replace { with, .. } => {
                let new = out.new_leaf(Leaf::new(with));
                out.replace_with(target, new)?;
            }
            Self::Expand { rule, with, .. } => {
                let sibling = out.new_leaf(Leaf::new(with));
                out.extend_with(target, sibling, rule)?;
            }
            Self::Remove { .. } => out.detach_self(target)?,
        }
        Ok(out)
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace { site, with } => write!(f, "replace #{} with {}", site, with),
            Self::Expand { site, rule, with } => write!(f, "expand #{} by {} {}", site, rule, with),
            Self::Remove { site } => write!(f, "remove #{}", site),
        }
    }
}

/// A candidate tree together with the mutation that produced it.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub mutation: Mutation,
    pub tree: KernelTree,
}

/// Lazy iterator over the neighbourhood of a tree.
///
/// Sites are visited in post-order; per site the order is REPLACE (catalog
/// order), EXPAND (operators outer, bases inner), REMOVE.
pub struct Neighbors<'a> {
    grammar: &'a Grammar,
    source: &'a KernelTree,
    sites: Vec<(usize, NodeId)>,
    next_site: usize,
    pending: std::vec::IntoIter<Mutation>,
}

impl Iterator for Neighbors<'_> {
    type Item = Neighbor;

    fn next(&mut self) -> Option<Neighbor> {
        loop {
            let Some(mutation) = self.pending.next() else {
                let &(site, id) = self.sites.get(self.next_site)?;
                self.next_site += 1;
                self.pending = self.grammar.site_moves(self.source, site, id).into_iter();
                continue;
            };
            match mutation.apply(self.source) {
                Ok(tree) => return Some(Neighbor { mutation, tree }),
                Err(e) => warn!("Skipping {} on {}: {}", mutation, self.source, e),
            }
        }
    }
}
