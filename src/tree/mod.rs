//! Arena-backed kernel expression tree.
//!
//! A [`KernelTree`] is the Root holder: it owns an arena of nodes and
//! designates exactly one of them as the top-level node. Operator nodes own
//! their children through `Vec<NodeId>`; every node keeps a non-owning
//! [`Parent`] link used for tree surgery (detach, attach, replace).
//!
//! Detached nodes stay in the arena as unreachable slots until the tree is
//! compacted, which happens on clone and at the end of simplification.

mod parse;

pub use parse::MAX_DEPTH;


use core::cmp::Ordering;
use core::fmt;

use crate::error::KernelError;
use crate::kernel::{BaseKind, CombRule, Leaf};

/// Reference to a node (index into the tree's arena).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Get the underlying index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Structural back-link of a node. Never owning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    /// Top-level node of the tree.
    Root,
    /// Child of an operator node.
    Node(NodeId),
    /// Not reachable from the top.
    Detached,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Operator { rule: CombRule, children: Vec<NodeId> },
    Leaf(Leaf),
}

#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    parent: Parent,
}

impl Node {
    fn detached(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: Parent::Detached,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Parent {
        self.parent
    }

    pub fn is_operator(&self) -> bool {
        matches!(self.kind, NodeKind::Operator { .. })
    }

    pub fn rule(&self) -> Option<CombRule> {
        match self.kind {
            NodeKind::Operator { rule, .. } => Some(rule),
            NodeKind::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Operator { .. } => None,
        }
    }

    /// Type tag: `+`/`*` for operators, the base tag for leaves.
    pub fn tag(&self) -> &'static str {
        match &self.kind {
            NodeKind::Operator { rule, .. } => rule.tag(),
            NodeKind::Leaf(leaf) => leaf.kind().tag(),
        }
    }

    fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Operator { children, .. } => children,
            NodeKind::Leaf(_) => &[],
        }
    }
}

/// A kernel expression: the Root holder plus its node arena.
#[derive(Debug)]
pub struct KernelTree {
    nodes: Vec<Node>,
    top: NodeId,
}

impl KernelTree {
    /// Single-leaf tree with default parameters.
    pub fn leaf(kind: BaseKind) -> Self {
        Self::from_leaf(Leaf::new(kind))
    }

    pub fn from_leaf(leaf: Leaf) -> Self {
        let mut tree = Self::empty();
        let top = tree.new_leaf(leaf);
        tree.set_top(top);
        tree
    }

    /// Tree whose top is a `rule` operator over copies of `parts`.
    pub fn combine<'a>(rule: CombRule, parts: impl IntoIterator<Item = &'a KernelTree>) -> Self {
        let mut tree = Self::empty();
        let op = tree.new_operator(rule);
        tree.set_top(op);
        for part in parts {
            let child = tree.graft(part, part.top());
            tree.push_child(op, child);
        }
        tree
    }

    /// Arena with no top yet. Callers must `set_top` before handing it out.
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            top: NodeId(0),
        }
    }

    // --- Accessors ---

    pub fn top(&self) -> NodeId {
        self.top
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn is_operator(&self, id: NodeId) -> bool {
        self.node(id).is_operator()
    }

    /// Children of an operator node; empty for leaves.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn parent(&self, id: NodeId) -> Parent {
        self.node(id).parent
    }

    pub fn rule(&self, id: NodeId) -> Option<CombRule> {
        self.node(id).rule()
    }

    pub fn tag(&self, id: NodeId) -> &'static str {
        self.node(id).tag()
    }

    /// True iff the node's parent is the Root holder.
    pub fn is_toplevel(&self, id: NodeId) -> bool {
        self.parent(id) == Parent::Root
    }

    pub fn leaf_at(&self, id: NodeId) -> Option<&Leaf> {
        self.node(id).as_leaf()
    }

    pub fn leaf_at_mut(&mut self, id: NodeId) -> Option<&mut Leaf> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Operator { .. } => None,
        }
    }

    /// Post-order traversal of the reachable tree. Each call starts fresh.
    pub fn iter(&self) -> PostOrder<'_> {
        PostOrder {
            tree: self,
            stack: vec![(self.top, 0)],
        }
    }

    /// Reachable leaves, in post-order.
    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> + '_ {
        self.iter().filter_map(move |id| self.leaf_at(id))
    }

    /// Number of reachable nodes.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false: a tree owns at least its top-level node.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Total number of continuous parameters across all leaves.
    pub fn n_params(&self) -> usize {
        self.leaves().map(Leaf::arity).sum()
    }

    /// Reachable leaves in post-order, mutably.
    pub fn leaves_mut(&mut self) -> Vec<&mut Leaf> {
        let mut rank = vec![None; self.nodes.len()];
        for (pos, id) in self.iter().enumerate() {
            rank[id.0] = Some(pos);
        }
        let mut leaves: Vec<(usize, &mut Leaf)> = self
            .nodes
            .iter_mut()
            .zip(rank)
            .filter_map(|(node, pos)| match (&mut node.kind, pos) {
                (NodeKind::Leaf(leaf), Some(pos)) => Some((pos, leaf)),
                _ => None,
            })
            .collect();
        leaves.sort_by_key(|(pos, _)| *pos);
        leaves.into_iter().map(|(_, leaf)| leaf).collect()
    }

    /// Freeze the parameters of every reachable leaf.
    pub fn fix_parameters(&mut self) {
        for leaf in self.leaves_mut() {
            leaf.fix_params();
        }
    }

    /// Independent tree holding a deep copy of the subtree at `id`.
    pub fn subtree(&self, id: NodeId) -> KernelTree {
        let mut tree = Self::empty();
        let top = tree.graft(self, id);
        tree.set_top(top);
        tree
    }

    // --- Node allocation ---

    /// Allocate a detached leaf node.
    pub fn new_leaf(&mut self, leaf: Leaf) -> NodeId {
        self.alloc(NodeKind::Leaf(leaf))
    }

    /// Allocate a detached operator node with no children.
    pub fn new_operator(&mut self, rule: CombRule) -> NodeId {
        self.alloc(NodeKind::Operator {
            rule,
            children: Vec::new(),
        })
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::detached(kind));
        id
    }

    // --- Surgery ---

    /// Append `node` to the children of operator `parent`.
    ///
    /// A node still attached to another operator is moved. Fails without
    /// touching the tree if `parent` is a leaf, if `node` is top-level, or if
    /// the move would create a cycle.
    pub fn attach_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), KernelError> {
        if !self.is_operator(parent) {
            return Err(KernelError::NotAnOperator);
        }
        self.check_movable(node, parent)?;
        if let Parent::Node(old) = self.parent(node) {
            self.detach_child(old, node);
        }
        self.push_child(parent, node);
        Ok(())
    }

    /// Remove `node` from `parent`'s children. No-op if it is not a child.
    pub fn detach_child(&mut self, parent: NodeId, node: NodeId) {
        let NodeKind::Operator { children, .. } = &mut self.nodes[parent.0].kind else {
            return;
        };
        if let Some(pos) = children.iter().position(|&c| c == node) {
            children.remove(pos);
            self.nodes[node.0].parent = Parent::Detached;
        }
    }

    /// Detach this node from its parent. The top-level node can only be replaced.
    pub fn detach_self(&mut self, id: NodeId) -> Result<(), KernelError> {
        match self.parent(id) {
            Parent::Root => Err(KernelError::CannotDetachRoot),
            Parent::Node(parent) => {
                self.detach_child(parent, id);
                Ok(())
            }
            Parent::Detached => Ok(()),
        }
    }

    /// Install `new` at `id`'s position (same slot in the parent's child list,
    /// or as the Root's node) and detach `id`. A detached `id` has no position
    /// and is rejected.
    pub fn replace_with(&mut self, id: NodeId, new: NodeId) -> Result<(), KernelError> {
        if self.parent(id) == Parent::Detached {
            return Err(KernelError::Detached);
        }
        if id == new {
            return Ok(());
        }
        self.check_movable(new, id)?;
        if let Parent::Node(old) = self.parent(new) {
            self.detach_child(old, new);
        }
        match self.parent(id) {
            Parent::Root => self.set_top(new),
            Parent::Node(parent) => {
                if let NodeKind::Operator { children, .. } = &mut self.nodes[parent.0].kind {
                    if let Some(slot) = children.iter_mut().find(|c| **c == id) {
                        *slot = new;
                    }
                }
                self.nodes[new.0].parent = Parent::Node(parent);
            }
            Parent::Detached => return Err(KernelError::Detached),
        }
        self.nodes[id.0].parent = Parent::Detached;
        Ok(())
    }

    /// Wrap `id` and `sibling` in a fresh `rule` operator installed at `id`'s
    /// position. Returns the new operator.
    pub fn extend_with(
        &mut self,
        id: NodeId,
        sibling: NodeId,
        rule: CombRule,
    ) -> Result<NodeId, KernelError> {
        if sibling == id {
            return Err(KernelError::WouldCycle);
        }
        if self.parent(id) == Parent::Detached {
            return Err(KernelError::Detached);
        }
        self.check_movable(sibling, id)?;
        let op = self.new_operator(rule);
        self.replace_with(id, op)?;
        self.push_child(op, id);
        if let Parent::Node(old) = self.parent(sibling) {
            self.detach_child(old, sibling);
        }
        self.push_child(op, sibling);
        Ok(op)
    }

    /// `node` may be moved under (or in place of) `anchor`: it is not the
    /// top-level node and not `anchor` or one of its ancestors.
    fn check_movable(&self, node: NodeId, anchor: NodeId) -> Result<(), KernelError> {
        if self.is_toplevel(node) {
            return Err(KernelError::CannotDetachRoot);
        }
        let mut cur = anchor;
        loop {
            if cur == node {
                return Err(KernelError::WouldCycle);
            }
            match self.parent(cur) {
                Parent::Node(p) => cur = p,
                Parent::Root | Parent::Detached => return Ok(()),
            }
        }
    }

    fn push_child(&mut self, parent: NodeId, node: NodeId) {
        if let NodeKind::Operator { children, .. } = &mut self.nodes[parent.0].kind {
            children.push(node);
            self.nodes[node.0].parent = Parent::Node(parent);
        }
    }

    pub(crate) fn set_top(&mut self, id: NodeId) {
        if self.top.0 < self.nodes.len() && self.top != id && self.is_toplevel(self.top) {
            self.nodes[self.top.0].parent = Parent::Detached;
        }
        self.top = id;
        self.nodes[id.0].parent = Parent::Root;
    }

    /// Reorder an operator's children with `compare`. Stable.
    pub(crate) fn sort_children_by(
        &mut self,
        id: NodeId,
        mut compare: impl FnMut(&Self, NodeId, NodeId) -> Ordering,
    ) {
        let mut sorted = self.children(id).to_vec();
        sorted.sort_by(|&a, &b| compare(self, a, b));
        if let NodeKind::Operator { children, .. } = &mut self.nodes[id.0].kind {
            *children = sorted;
        }
    }

    /// Drop unreachable slots. Moves nodes, so materialized handles survive.
    pub(crate) fn compact(&mut self) {
        let mut old: Vec<Option<Node>> = core::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        let mut pending = Vec::new();
        let top = self.move_node(&mut old, self.top, &mut pending);
        while let Some((id, parent)) = pending.pop() {
            let moved = self.move_node(&mut old, id, &mut pending);
            self.push_child(parent, moved);
        }
        self.top = top;
        self.nodes[top.0].parent = Parent::Root;
    }

    /// Move one node out of `old`, queueing its children under the new id.
    fn move_node(
        &mut self,
        old: &mut [Option<Node>],
        id: NodeId,
        pending: &mut Vec<(NodeId, NodeId)>,
    ) -> NodeId {
        let Some(node) = old[id.0].take() else {
            unreachable!("node {} reached twice during compaction", id.0);
        };
        match node.kind {
            NodeKind::Leaf(leaf) => self.new_leaf(leaf),
            NodeKind::Operator { rule, children } => {
                let op = self.new_operator(rule);
                pending.extend(children.into_iter().rev().map(|child| (child, op)));
                op
            }
        }
    }

    /// Deep-copy the subtree of `src` at `id` into this arena, detached.
    fn graft(&mut self, src: &KernelTree, id: NodeId) -> NodeId {
        let mut pending = Vec::new();
        let top = self.copy_node(src, id, &mut pending);
        while let Some((id, parent)) = pending.pop() {
            let copy = self.copy_node(src, id, &mut pending);
            self.push_child(parent, copy);
        }
        top
    }

    fn copy_node(
        &mut self,
        src: &KernelTree,
        id: NodeId,
        pending: &mut Vec<(NodeId, NodeId)>,
    ) -> NodeId {
        match &src.node(id).kind {
            NodeKind::Leaf(leaf) => self.new_leaf(leaf.clone()),
            NodeKind::Operator { rule, children } => {
                let op = self.new_operator(*rule);
                pending.extend(children.iter().rev().map(|&child| (child, op)));
                op
            }
        }
    }

    /// Serialize the subtree at `id`: leaf tag, or `(<op> <child> ...)`.
    pub fn serialize_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let mut pending = vec![Emit::Node(id)];
        while let Some(item) = pending.pop() {
            let id = match item {
                Emit::Text(text) => {
                    out.push_str(text);
                    continue;
                }
                Emit::Node(id) => id,
            };
            match &self.node(id).kind {
                NodeKind::Leaf(leaf) => out.push_str(leaf.kind().tag()),
                NodeKind::Operator { rule, children } => {
                    out.push('(');
                    out.push_str(rule.tag());
                    pending.push(Emit::Text(")"));
                    for &child in children.iter().rev() {
                        pending.push(Emit::Node(child));
                        pending.push(Emit::Text(" "));
                    }
                }
            }
        }
    }
}

/// Pending serialization work.
enum Emit {
    Node(NodeId),
    Text(&'static str),
}

impl Clone for KernelTree {
    /// Deep copy of the reachable tree. Leaf handles start unmaterialized.
    fn clone(&self) -> Self {
        self.subtree(self.top)
    }
}

impl fmt::Display for KernelTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize_node(self.top))
    }
}

/// Lazy post-order traversal: all descendants before the node itself.
pub struct PostOrder<'a> {
    tree: &'a KernelTree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for PostOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let (id, next_child) = self.stack.last_mut()?;
            let id = *id;
            let children = self.tree.children(id);
            if *next_child < children.len() {
                let child = children[*next_child];
                *next_child += 1;
                self.stack.push((child, 0));
            } else {
                self.stack.pop();
                return Some(id);
            }
        }
    }
}
