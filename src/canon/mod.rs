//! Canonicalization of kernel expressions.
//!
//! `simplify` flattens nested operators of the same rule, collapses
//! single-child operators and sorts children, so that every structurally
//! equivalent tree serializes to the same canonical string.


use log::trace;

use crate::kernel::CombRule;
use crate::tree::{KernelTree, NodeId};

/// Rewrite `tree` in place into its canonical form. Idempotent.
pub fn simplify(tree: &mut KernelTree) {
    // Post-order: every operator sees children that are already canonical.
    let operators: Vec<NodeId> = tree.iter().filter(|&id| tree.is_operator(id)).collect();
    for id in operators {
        simplify_operator(tree, id);
    }
    tree.compact();
    trace!("Simplified to {}", tree);
}

/// Canonicalize one operator whose children are already simplified.
fn simplify_operator(tree: &mut KernelTree, id: NodeId) {
    let Some(rule) = tree.rule(id) else {
        return;
    };

    let children = tree.children(id).to_vec();
    for child in children {
        if tree.rule(child) == Some(rule) {
            flatten_into(tree, id, child);
        }
    }

    if tree.children(id).len() == 1 {
        let only = tree.children(id)[0];
        // `only` sits directly below `id`, so the swap cannot fail.
        if tree.replace_with(id, only).is_ok() {
            return;
        }
    }

    sort_children(tree, id);
}

/// Move every child of `child` into `parent` and discard `child`.
fn flatten_into(tree: &mut KernelTree, parent: NodeId, child: NodeId) {
    let grandkids = tree.children(child).to_vec();
    for grandkid in grandkids {
        // `parent` is an operator and `grandkid` is not its ancestor.
        let _ = tree.attach_child(parent, grandkid);
    }
    tree.detach_child(parent, child);
}

/// Order children by tag, ties broken by their serialized form.
fn sort_children(tree: &mut KernelTree, id: NodeId) {
    tree.sort_children_by(id, |tree, a, b| {
        tree.tag(a)
            .cmp(tree.tag(b))
            .then_with(|| tree.serialize_node(a).cmp(&tree.serialize_node(b)))
    });
}

/// Serialized form of the tree as it stands. Only canonical after `simplify`.
pub fn canonical_string(tree: &KernelTree) -> String {
    tree.to_string()
}

/// Canonical string of a simplified copy, leaving `tree` untouched.
pub fn canonical_form(tree: &KernelTree) -> String {
    let mut copy = tree.clone();
    simplify(&mut copy);
    canonical_string(&copy)
}

/// Split a kernel into additive components.
///
/// Simplifies a copy first; a top-level sum yields one tree per summand,
/// anything else yields the whole kernel.
pub fn summands(tree: &KernelTree) -> Vec<KernelTree> {
    let mut copy = tree.clone();
    simplify(&mut copy);
    let top = copy.top();
    if copy.rule(top) != Some(CombRule::Sum) || copy.children(top).is_empty() {
        return vec![copy];
    }
    copy.children(top)
        .iter()
        .map(|&child| copy.subtree(child))
        .collect()
}
