//! The whisker tree: a region-keyed lookup structure over memory space.
//!
//! ## Layout
//!
//! Nodes live in an arena (`Vec<WhiskerNode>`) and refer to each other by
//! index. Node 0 is the root, whose region spans the whole memory space.
//!
//! ## Accretion, not partitioning
//!
//! Insertion never subdivides a region. An incoming whisker either replaces
//! the rule of the first node whose region intersects its domain (when its
//! generation is strictly newer) or is appended as a new child holding its
//! own domain verbatim. Siblings may overlap, and lookups resolve overlaps by
//! declaration order. Because the root covers everything, a tree built by
//! [`WhiskerTree::insert`] alone keeps a single node; [`InsertMode::Diagnostic`]
//! and [`WhiskerTree::overlaps`] make the overlap structure visible.

use std::fmt;

use crate::memory::{Memory, MemoryRange};

use super::{Whisker, WhiskerError};

pub type NodeId = usize;

const ROOT: NodeId = 0;

/// How [`WhiskerTree::insert`] reports overlapping regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Insert silently.
    #[default]
    Strict,
    /// Log every region the inserted node overlaps with.
    Diagnostic,
}

#[derive(Debug, Clone)]
struct WhiskerNode {
    /// Region this node answers for; kept when the rule is replaced.
    region: MemoryRange,
    whisker: Whisker,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An n-ary tree of regions, each owning one [`Whisker`].
#[derive(Debug, Clone)]
pub struct WhiskerTree {
    nodes: Vec<WhiskerNode>,
    mode: InsertMode,
}

impl Default for WhiskerTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WhiskerTree {
    /// A tree holding only the default root rule.
    pub fn new() -> Self {
        Self::with_root(Whisker::default_root())
    }

    /// A tree whose root holds `root`, answering for `root`'s domain.
    pub fn with_root(root: Whisker) -> Self {
        Self {
            nodes: vec![WhiskerNode {
                region: *root.domain(),
                whisker: root,
                parent: None,
                children: Vec::new(),
            }],
            mode: InsertMode::Strict,
        }
    }

    pub fn with_mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> InsertMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InsertMode) {
        self.mode = mode;
    }

    pub fn root(&self) -> &Whisker {
        &self.nodes[ROOT].whisker
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Longest root-to-leaf path, counted in nodes.
    pub fn depth(&self) -> usize {
        (0..self.nodes.len())
            .map(|id| self.ancestors(id).count() + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn whisker(&self, id: NodeId) -> Option<&Whisker> {
        self.nodes.get(id).map(|node| &node.whisker)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Inserts `whisker`, returning the node now holding it.
    ///
    /// Fails with [`WhiskerError::Conflict`] when the first intersecting node
    /// already holds a rule of the same or a newer generation.
    pub fn insert(&mut self, whisker: Whisker) -> Result<NodeId, WhiskerError> {
        let mut current = ROOT;
        let id = loop {
            let node = &self.nodes[current];
            if node.region.intersects(whisker.domain()) {
                if node.whisker.generation() >= whisker.generation() {
                    tracing::debug!(
                        node = current,
                        existing = node.whisker.generation(),
                        incoming = whisker.generation(),
                        "whisker insertion conflict"
                    );
                    return Err(WhiskerError::Conflict {
                        incoming: whisker.generation(),
                        existing: node.whisker.generation(),
                    });
                }
                self.nodes[current].whisker = whisker;
                break current;
            }

            let next = node
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].region.intersects(whisker.domain()));
            match next {
                Some(child) => current = child,
                None => break self.push_child(current, whisker),
            }
        };

        if self.mode == InsertMode::Diagnostic {
            self.report_overlaps(id);
        }
        Ok(id)
    }

    /// Depth-first, declaration-order search for the first region containing
    /// `memory`.
    pub fn find_whisker(&self, memory: &Memory) -> Result<&Whisker, WhiskerError> {
        self.find_node(memory)
            .map(|id| &self.nodes[id].whisker)
            .ok_or(WhiskerError::NotFound)
    }

    pub fn find_node(&self, memory: &Memory) -> Option<NodeId> {
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.region.contains(memory) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Whiskers in depth-first declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Whisker> + '_ {
        self.preorder().into_iter().map(|id| &self.nodes[id].whisker)
    }

    /// Every pair of nodes whose regions intersect, ordered by node id.
    pub fn overlaps(&self) -> Vec<(NodeId, NodeId)> {
        let mut pairs = Vec::new();
        for (a, left) in self.nodes.iter().enumerate() {
            for (b, right) in self.nodes.iter().enumerate().skip(a + 1) {
                if left.region.intersects(&right.region) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    /// Logs every overlapping pair at `warn` and returns how many there are.
    pub fn log_overlaps(&self) -> usize {
        let pairs = self.overlaps();
        for &(a, b) in &pairs {
            tracing::warn!(
                node = a,
                other = b,
                generation = self.nodes[a].whisker.generation(),
                other_generation = self.nodes[b].whisker.generation(),
                "whisker regions overlap"
            );
        }
        pairs.len()
    }

    fn push_child(&mut self, parent: NodeId, whisker: Whisker) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(WhiskerNode {
            region: *whisker.domain(),
            whisker,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn report_overlaps(&self, id: NodeId) {
        let region = &self.nodes[id].region;
        let overlapping: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&other| other != id && self.nodes[other].region.intersects(region))
            .collect();
        if !overlapping.is_empty() {
            tracing::warn!(
                node = id,
                generation = self.nodes[id].whisker.generation(),
                ?overlapping,
                "inserted whisker region overlaps existing regions"
            );
        }
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, |&node| self.nodes[node].parent)
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        order
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, id: NodeId, indent: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.nodes[id].whisker, indent = indent)?;
        for &child in &self.nodes[id].children {
            self.render(f, child, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for WhiskerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, ROOT, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(low: f64, high: f64) -> MemoryRange {
        MemoryRange::new(
            Memory::from_coordinates(low, low, low, low),
            Memory::from_coordinates(high, high, high, high),
        )
    }

    fn whisker(generation: u32, increment: i32, domain: MemoryRange) -> Whisker {
        Whisker::new(generation, increment, 1.0, 0.0, domain)
    }

    #[test]
    fn test_root_covers_every_state() {
        let tree = WhiskerTree::new();
        let states = [
            Memory::new(),
            Memory::from_coordinates(1.0, 2.0, 3.0, 4.0),
            Memory::from_coordinates(1e300, 0.0, 1.0, 1e-300),
            Memory::max_value(),
        ];
        for state in states {
            assert_eq!(tree.find_whisker(&state).unwrap(), &Whisker::default_root());
        }
    }

    #[test]
    fn test_newer_generation_replaces_root_rule_in_place() {
        let mut tree = WhiskerTree::new();
        let id = tree.insert(whisker(1, 4, cube(0.0, 1.0))).unwrap();
        assert_eq!(id, 0);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().window_increment(), 4);

        // the root keeps answering for the whole space
        let far = Memory::from_coordinates(50.0, 50.0, 50.0, 50.0);
        assert_eq!(tree.find_whisker(&far).unwrap().window_increment(), 4);
    }

    #[test]
    fn test_same_or_older_generation_conflicts() {
        let mut tree = WhiskerTree::new();
        tree.insert(whisker(3, 1, cube(0.0, 1.0))).unwrap();

        let err = tree.insert(whisker(3, 2, cube(0.0, 1.0))).unwrap_err();
        assert_eq!(
            err,
            WhiskerError::Conflict {
                incoming: 3,
                existing: 3
            }
        );
        let err = tree.insert(whisker(2, 2, cube(5.0, 6.0))).unwrap_err();
        assert!(matches!(err, WhiskerError::Conflict { incoming: 2, .. }));
        assert_eq!(tree.root().window_increment(), 1);
    }

    #[test]
    fn test_generation_ordering() {
        for (held, incoming) in [(0u32, 1u32), (1, 1), (5, 2), (5, 9)] {
            let mut tree = WhiskerTree::with_root(whisker(held, 0, MemoryRange::full()));
            let result = tree.insert(whisker(incoming, 7, cube(0.0, 1.0)));
            assert_eq!(result.is_ok(), incoming > held, "held={held} incoming={incoming}");
        }
    }

    #[test]
    fn test_disjoint_whiskers_accrete_as_children() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        let a = tree.insert(whisker(1, 10, cube(2.0, 3.0))).unwrap();
        let b = tree.insert(whisker(1, 20, cube(4.0, 5.0))).unwrap();
        assert_eq!(tree.children(0), &[a, b]);
        assert_eq!(tree.parent(b), Some(0));
        assert_eq!(tree.depth(), 2);

        let in_b = Memory::from_coordinates(4.5, 4.5, 4.5, 4.5);
        assert_eq!(tree.find_whisker(&in_b).unwrap().window_increment(), 20);
    }

    #[test]
    fn test_insert_descends_into_first_intersecting_child() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        let child = tree.insert(whisker(1, 10, cube(2.0, 3.0))).unwrap();
        let replaced = tree.insert(whisker(2, 11, cube(2.5, 9.0))).unwrap();
        assert_eq!(replaced, child);
        assert_eq!(tree.len(), 2);

        // region retained: the replacement answers for [2, 3] only
        let inside = Memory::from_coordinates(2.2, 2.2, 2.2, 2.2);
        assert_eq!(tree.find_whisker(&inside).unwrap().window_increment(), 11);
        let outside = Memory::from_coordinates(8.0, 8.0, 8.0, 8.0);
        assert_eq!(tree.find_whisker(&outside), Err(WhiskerError::NotFound));
    }

    #[test]
    fn test_lookup_prefers_declaration_order_among_overlaps() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        tree.insert(whisker(1, 10, cube(2.0, 4.0))).unwrap();
        // a second, overlapping child can only exist when built by hand
        let id = tree.push_child(0, whisker(1, 20, cube(3.0, 5.0)));
        let shared = Memory::from_coordinates(3.5, 3.5, 3.5, 3.5);
        assert_eq!(tree.find_whisker(&shared).unwrap().window_increment(), 10);
        assert!(tree.overlaps().contains(&(1, id)));
    }

    #[test]
    fn test_lookup_reaches_grandchildren() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        let child = tree.insert(whisker(1, 10, cube(2.0, 3.0))).unwrap();
        let grandchild = tree.push_child(child, whisker(1, 30, cube(6.0, 7.0)));
        assert_eq!(tree.depth(), 3);
        let deep = Memory::from_coordinates(6.5, 6.5, 6.5, 6.5);
        assert_eq!(tree.find_node(&deep), Some(grandchild));
    }

    #[test]
    fn test_lookup_miss_is_reported() {
        let tree = WhiskerTree::with_root(whisker(0, 0, cube(1.0, 2.0)));
        assert_eq!(tree.find_whisker(&Memory::new()), Err(WhiskerError::NotFound));
    }

    #[test]
    fn test_overlaps_on_single_root_is_empty() {
        assert!(WhiskerTree::new().overlaps().is_empty());
    }

    #[test]
    fn test_diagnostic_mode_still_inserts() {
        let mut tree =
            WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0))).with_mode(InsertMode::Diagnostic);
        tree.insert(whisker(1, 10, cube(2.0, 3.0))).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.mode(), InsertMode::Diagnostic);
    }

    #[test_log::test]
    fn test_log_overlaps_counts_pairs() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        tree.insert(whisker(1, 10, cube(2.0, 4.0))).unwrap();
        tree.insert(whisker(1, 20, cube(5.0, 6.0))).unwrap();
        assert_eq!(tree.log_overlaps(), 0);

        tree.push_child(0, whisker(1, 30, cube(3.0, 5.5)));
        // the new node overlaps both earlier children
        assert_eq!(tree.log_overlaps(), 2);
        assert_eq!(tree.overlaps(), vec![(1, 3), (2, 3)]);
    }

    #[test]
    fn test_display_indents_children() {
        let mut tree = WhiskerTree::with_root(whisker(0, 0, cube(0.0, 1.0)));
        tree.insert(whisker(1, 10, cube(2.0, 3.0))).unwrap();
        let rendered = tree.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("generation=0"));
        assert!(lines[1].starts_with("  generation=1"));
        assert_eq!(tree.iter().count(), 2);
    }
}
