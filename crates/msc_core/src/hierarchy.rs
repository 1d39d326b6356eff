//! Output contract towards persistence hierarchy builders.
//!
//! The engine reports, per direction, one node per extremum and per saddle,
//! the arcs joining every saddle to the extrema of the basins it separates,
//! and optionally the steepest paths realizing those arcs. Once everything
//! is submitted it asks the builder to construct its hierarchy exactly once.
//!
//! Two builders ship with the crate: [`EventLog`] records the calls verbatim
//! and [`PersistenceHierarchy`] pairs extrema with saddles by sweeping the
//! saddles from the most extremal one down, the way a merge tree does.

use crate::{MscError, Result};
use log::debug;
use msc_common::{Direction, NodeKind, Recoverability, VertexId};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Snapshot of one hierarchy node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub id: VertexId,
    pub value: f64,
    pub kind: NodeKind,

    /// Persistence of the cancellation that removes this node, or infinity
    /// while it is never cancelled.
    pub persistence: f64,
}

impl Node {
    fn new(id: VertexId, value: f64, kind: NodeKind) -> Self {
        Self {
            id,
            value,
            kind,
            persistence: f64::INFINITY,
        }
    }
}

/// Consumer of the nodes, arcs, and paths of one basin direction.
///
/// Both endpoints of an arc are added before the arc. A vertex that is the
/// saddle of several basin pairs is added once as a [`NodeKind::Saddle`] and
/// then promoted through [`add_multi_saddle`](Self::add_multi_saddle).
pub trait HierarchyBuilder {
    fn add_node(&mut self, id: VertexId, value: f64, kind: NodeKind) -> Result<()>;

    fn add_arc(&mut self, extremum: VertexId, saddle: VertexId) -> Result<()>;

    /// Steepest path from a saddle to one of its extrema, saddle first.
    fn add_path(&mut self, ids: &[VertexId]) -> Result<()>;

    fn add_multi_saddle(&mut self, node: VertexId) -> Result<()>;

    /// Builds the hierarchy up to persistence `ceiling`. Called once, after
    /// every node, arc, and path of `direction` was submitted.
    fn construct_hierarchy(
        &mut self,
        ceiling: f64,
        recoverability: Recoverability,
        direction: Direction,
    ) -> Result<()>;

    fn find_element(&self, id: VertexId) -> Option<Node>;

    /// Node that represents `id` at the current persistence threshold.
    fn find_active_node(&self, id: VertexId) -> Result<Node>;

    fn update_persistence(&mut self, threshold: f64);

    fn size(&self) -> usize;

    /// Reports the smallest scalar value of the field.
    fn min_f(&mut self, value: f64);

    /// Reports the largest scalar value of the field.
    fn max_f(&mut self, value: f64);
}

/// One recorded builder call.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Node { id: VertexId, value: f64, kind: NodeKind },
    Arc { extremum: VertexId, saddle: VertexId },
    Path(Vec<VertexId>),
    MultiSaddle(VertexId),
    Construct {
        ceiling: f64,
        recoverability: Recoverability,
        direction: Direction,
    },
}

/// Builder that records every call and checks the submission contract.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<Event>,
    nodes: HashMap<VertexId, Node>,
    range: Option<(f64, f64)>,
    threshold: f64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every arc as `(extremum, saddle)`, sorted.
    pub fn arcs(&self) -> Vec<(VertexId, VertexId)> {
        let mut arcs: Vec<_> = self
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Arc { extremum, saddle } => Some((*extremum, *saddle)),
                _ => None,
            })
            .collect();
        arcs.sort_unstable();
        arcs
    }

    /// Ids of every node of `kind`, sorted.
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<VertexId> {
        let mut ids: Vec<_> = self
            .nodes
            .values()
            .filter(|node| node.kind == kind)
            .map(|node| node.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn paths(&self) -> Vec<&[VertexId]> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Path(ids) => Some(ids.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn constructed(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, Event::Construct { .. }))
    }
}

impl HierarchyBuilder for EventLog {
    fn add_node(&mut self, id: VertexId, value: f64, kind: NodeKind) -> Result<()> {
        if self.nodes.insert(id, Node::new(id, value, kind)).is_some() {
            return Err(MscError::InvariantViolated(format!("node {id} added twice")));
        }
        self.events.push(Event::Node { id, value, kind });
        Ok(())
    }

    fn add_arc(&mut self, extremum: VertexId, saddle: VertexId) -> Result<()> {
        for id in [extremum, saddle] {
            if !self.nodes.contains_key(&id) {
                return Err(MscError::InvalidReference { id });
            }
        }
        self.events.push(Event::Arc { extremum, saddle });
        Ok(())
    }

    fn add_path(&mut self, ids: &[VertexId]) -> Result<()> {
        self.events.push(Event::Path(ids.to_vec()));
        Ok(())
    }

    fn add_multi_saddle(&mut self, node: VertexId) -> Result<()> {
        let entry = self
            .nodes
            .get_mut(&node)
            .ok_or(MscError::InvalidReference { id: node })?;
        entry.kind = NodeKind::MultiSaddle;
        self.events.push(Event::MultiSaddle(node));
        Ok(())
    }

    fn construct_hierarchy(
        &mut self,
        ceiling: f64,
        recoverability: Recoverability,
        direction: Direction,
    ) -> Result<()> {
        if self.constructed() {
            return Err(MscError::InvariantViolated(
                "hierarchy constructed twice".into(),
            ));
        }
        self.events.push(Event::Construct {
            ceiling,
            recoverability,
            direction,
        });
        Ok(())
    }

    fn find_element(&self, id: VertexId) -> Option<Node> {
        self.nodes.get(&id).copied()
    }

    fn find_active_node(&self, id: VertexId) -> Result<Node> {
        self.find_element(id).ok_or(MscError::InvalidReference { id })
    }

    fn update_persistence(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    fn size(&self) -> usize {
        self.nodes.len()
    }

    fn min_f(&mut self, value: f64) {
        let (_, high) = self.range.unwrap_or((value, value));
        self.range = Some((value, high));
    }

    fn max_f(&mut self, value: f64) {
        let (low, _) = self.range.unwrap_or((value, value));
        self.range = Some((low, value));
    }
}

/// A node together with its place in the cancellation forest.
#[derive(Debug, Clone)]
struct Element {
    node: Node,

    /// Extrema an extremum-saddle arc leads to, for saddles only.
    arcs: Vec<VertexId>,

    /// Surviving extremum this one was merged into, for extrema only.
    parent: Option<VertexId>,

    /// Saddle of the cancellation that removed this extremum.
    partner: Option<VertexId>,
}

/// Merge-tree style persistence hierarchy.
///
/// Saddles are swept from the most extremal to the least extremal one. A
/// saddle whose arcs reach several merged components cancels every component
/// except the most extremal one, at a persistence equal to the value gap
/// between the cancelled extremum and the saddle. Cancellations above the
/// construction ceiling are not performed.
#[derive(Debug, Default)]
pub struct PersistenceHierarchy {
    elements: HashMap<VertexId, Element>,

    /// Extrema dropped by an irrecoverable threshold, mapped to their parent.
    dropped: HashMap<VertexId, VertexId>,

    direction: Option<Direction>,
    recoverability: Recoverability,
    threshold: f64,
    range: Option<(f64, f64)>,
    paths: usize,
}

impl PersistenceHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn path_count(&self) -> usize {
        self.paths
    }

    /// Smallest and largest value reported through `min_f` / `max_f`.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Every performed cancellation as `(extremum, saddle, persistence)`,
    /// lowest persistence first.
    pub fn cancellations(&self) -> Vec<(VertexId, VertexId, f64)> {
        let mut pairs: Vec<_> = self
            .elements
            .values()
            .filter_map(|e| e.partner.map(|saddle| (e.node.id, saddle, e.node.persistence)))
            .collect();
        pairs.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));
        pairs
    }

    /// Extrema still active at the current threshold, sorted by id.
    pub fn active_extrema(&self) -> Vec<VertexId> {
        let mut ids: Vec<_> = self
            .elements
            .values()
            .filter(|e| e.node.kind == NodeKind::Maximum && e.node.persistence > self.threshold)
            .map(|e| e.node.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Orders two nodes by value and id in the order of `direction`.
    fn compare(direction: Direction, a: &Node, b: &Node) -> Ordering {
        let ascending = a.value.total_cmp(&b.value).then(a.id.cmp(&b.id));
        match direction {
            Direction::Ascending => ascending,
            Direction::Descending => ascending.reverse(),
        }
    }

    fn node(&self, id: VertexId) -> Result<Node> {
        self.elements
            .get(&id)
            .map(|e| e.node)
            .ok_or(MscError::InvalidReference { id })
    }

    fn root(forest: &mut HashMap<VertexId, VertexId>, id: VertexId) -> VertexId {
        let mut root = id;
        while let Some(&up) = forest.get(&root) {
            if up == root {
                break;
            }
            root = up;
        }
        let mut current = id;
        while current != root {
            let up = forest.insert(current, root).unwrap_or(root);
            current = up;
        }
        root
    }
}

impl HierarchyBuilder for PersistenceHierarchy {
    fn add_node(&mut self, id: VertexId, value: f64, kind: NodeKind) -> Result<()> {
        if self.direction.is_some() {
            return Err(MscError::InvariantViolated(format!(
                "node {id} added after construction"
            )));
        }
        let element = Element {
            node: Node::new(id, value, kind),
            arcs: Vec::new(),
            parent: None,
            partner: None,
        };
        if self.elements.insert(id, element).is_some() {
            return Err(MscError::InvariantViolated(format!("node {id} added twice")));
        }
        Ok(())
    }

    fn add_arc(&mut self, extremum: VertexId, saddle: VertexId) -> Result<()> {
        if self.node(extremum)?.kind != NodeKind::Maximum {
            return Err(MscError::InvariantViolated(format!(
                "arc from {extremum}, which is not an extremum"
            )));
        }
        let element = self
            .elements
            .get_mut(&saddle)
            .ok_or(MscError::InvalidReference { id: saddle })?;
        if element.node.kind == NodeKind::Maximum {
            return Err(MscError::InvariantViolated(format!(
                "arc into {saddle}, which is not a saddle"
            )));
        }
        if !element.arcs.contains(&extremum) {
            element.arcs.push(extremum);
        }
        Ok(())
    }

    fn add_path(&mut self, ids: &[VertexId]) -> Result<()> {
        if let Some(&first) = ids.first() {
            self.node(first)?;
        }
        self.paths += 1;
        Ok(())
    }

    fn add_multi_saddle(&mut self, node: VertexId) -> Result<()> {
        let element = self
            .elements
            .get_mut(&node)
            .ok_or(MscError::InvalidReference { id: node })?;
        element.node.kind = NodeKind::MultiSaddle;
        Ok(())
    }

    fn construct_hierarchy(
        &mut self,
        ceiling: f64,
        recoverability: Recoverability,
        direction: Direction,
    ) -> Result<()> {
        if self.direction.is_some() {
            return Err(MscError::InvariantViolated(
                "hierarchy constructed twice".into(),
            ));
        }
        self.direction = Some(direction);
        self.recoverability = recoverability;

        let mut saddles: Vec<Node> = self
            .elements
            .values()
            .filter(|e| e.node.kind != NodeKind::Maximum)
            .map(|e| e.node)
            .collect();
        saddles.sort_by(|a, b| Self::compare(direction, b, a));

        let mut forest: HashMap<VertexId, VertexId> = HashMap::new();
        let mut cancelled = 0usize;

        for saddle in saddles {
            let arcs = self.elements[&saddle.id].arcs.clone();
            let components: BTreeSet<VertexId> = arcs
                .iter()
                .map(|&extremum| Self::root(&mut forest, extremum))
                .collect();

            let mut saddle_persistence = f64::INFINITY;
            if components.len() < 2 {
                saddle_persistence = 0.0;
            } else {
                let mut members: Vec<Node> = components
                    .iter()
                    .map(|&id| self.node(id))
                    .collect::<Result<_>>()?;
                members.sort_by(|a, b| Self::compare(direction, b, a));
                let survivor = members[0].id;

                for loser in &members[1..] {
                    let persistence = (loser.value - saddle.value).abs();
                    if persistence > ceiling {
                        continue;
                    }
                    forest.insert(loser.id, survivor);
                    let element = self
                        .elements
                        .get_mut(&loser.id)
                        .ok_or(MscError::InvalidReference { id: loser.id })?;
                    element.parent = Some(survivor);
                    element.partner = Some(saddle.id);
                    element.node.persistence = persistence;
                    saddle_persistence = saddle_persistence.min(persistence);
                    cancelled += 1;
                }
            }

            if let Some(element) = self.elements.get_mut(&saddle.id) {
                element.node.persistence = saddle_persistence;
            }
        }

        debug!(
            "{} hierarchy: {} nodes, {} cancellations below {}",
            direction.label(),
            self.elements.len(),
            cancelled,
            ceiling
        );
        Ok(())
    }

    fn find_element(&self, id: VertexId) -> Option<Node> {
        self.elements.get(&id).map(|e| e.node)
    }

    fn find_active_node(&self, id: VertexId) -> Result<Node> {
        let mut current = id;
        // Dropped extrema only survive as redirections.
        while let Some(&parent) = self.dropped.get(&current) {
            current = parent;
        }
        let mut element = self
            .elements
            .get(&current)
            .ok_or(MscError::InvalidReference { id })?;

        while element.node.kind == NodeKind::Maximum && element.node.persistence <= self.threshold {
            let Some(parent) = element.parent else { break };
            element = self
                .elements
                .get(&parent)
                .ok_or(MscError::InvalidReference { id: parent })?;
        }
        Ok(element.node)
    }

    fn update_persistence(&mut self, threshold: f64) {
        self.threshold = threshold;
        if self.recoverability != Recoverability::Irrecoverable {
            return;
        }

        let doomed: Vec<(VertexId, Option<VertexId>)> = self
            .elements
            .values()
            .filter(|e| e.node.persistence <= threshold)
            .map(|e| (e.node.id, e.parent))
            .collect();
        for (id, parent) in doomed {
            self.elements.remove(&id);
            if let Some(parent) = parent {
                self.dropped.insert(id, parent);
            }
        }
    }

    fn size(&self) -> usize {
        self.elements.len()
    }

    fn min_f(&mut self, value: f64) {
        let (_, high) = self.range.unwrap_or((value, value));
        self.range = Some((value, high));
    }

    fn max_f(&mut self, value: f64) {
        let (low, _) = self.range.unwrap_or((value, value));
        self.range = Some((low, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three maxima 10, 20, 30 of heights 5, 9, 7 joined by saddles
    /// 11 (height 2, between 10 and 20) and 21 (height 4, between 20 and 30).
    fn three_peaks() -> PersistenceHierarchy {
        let mut h = PersistenceHierarchy::new();
        h.add_node(10, 5.0, NodeKind::Maximum).unwrap();
        h.add_node(20, 9.0, NodeKind::Maximum).unwrap();
        h.add_node(30, 7.0, NodeKind::Maximum).unwrap();
        h.add_node(11, 2.0, NodeKind::Saddle).unwrap();
        h.add_node(21, 4.0, NodeKind::Saddle).unwrap();
        h.add_arc(10, 11).unwrap();
        h.add_arc(20, 11).unwrap();
        h.add_arc(20, 21).unwrap();
        h.add_arc(30, 21).unwrap();
        h
    }

    #[test]
    fn pairs_lower_peaks_with_their_saddles() {
        let mut h = three_peaks();
        h.construct_hierarchy(f64::INFINITY, Recoverability::Recoverable, Direction::Ascending)
            .unwrap();
        assert_eq!(h.cancellations(), vec![(10, 11, 3.0), (30, 21, 3.0)]);
        assert_eq!(h.find_element(20).unwrap().persistence, f64::INFINITY);
        assert_eq!(h.find_element(21).unwrap().persistence, 3.0);
    }

    #[test]
    fn threshold_redirects_cancelled_extrema() {
        let mut h = three_peaks();
        h.construct_hierarchy(f64::INFINITY, Recoverability::Recoverable, Direction::Ascending)
            .unwrap();
        assert_eq!(h.find_active_node(10).unwrap().id, 10);
        h.update_persistence(3.0);
        assert_eq!(h.find_active_node(10).unwrap().id, 20);
        assert_eq!(h.find_active_node(30).unwrap().id, 20);
        assert_eq!(h.active_extrema(), vec![20]);
        h.update_persistence(1.0);
        assert_eq!(h.find_active_node(10).unwrap().id, 10);
        assert_eq!(h.size(), 5);
    }

    #[test]
    fn irrecoverable_threshold_drops_nodes() {
        let mut h = three_peaks();
        h.construct_hierarchy(f64::INFINITY, Recoverability::Irrecoverable, Direction::Ascending)
            .unwrap();
        h.update_persistence(3.0);
        assert!(h.find_element(10).is_none());
        assert_eq!(h.find_active_node(10).unwrap().id, 20);
        h.update_persistence(0.0);
        assert!(h.find_element(10).is_none());
        assert_eq!(h.size(), 1);
    }

    #[test]
    fn ceiling_stops_large_cancellations() {
        let mut h = three_peaks();
        h.construct_hierarchy(2.0, Recoverability::Recoverable, Direction::Ascending)
            .unwrap();
        assert!(h.cancellations().is_empty());
        assert_eq!(h.active_extrema(), vec![10, 20, 30]);
    }

    #[test]
    fn descending_sweep_starts_at_lowest_saddle() {
        let mut h = PersistenceHierarchy::new();
        h.add_node(1, -5.0, NodeKind::Maximum).unwrap();
        h.add_node(2, -1.0, NodeKind::Maximum).unwrap();
        h.add_node(3, 0.5, NodeKind::Saddle).unwrap();
        h.add_arc(1, 3).unwrap();
        h.add_arc(2, 3).unwrap();
        h.construct_hierarchy(f64::INFINITY, Recoverability::Recoverable, Direction::Descending)
            .unwrap();
        assert_eq!(h.cancellations(), vec![(2, 3, 1.5)]);
    }

    #[test]
    fn contract_violations_are_reported() {
        let mut h = PersistenceHierarchy::new();
        h.add_node(1, 0.0, NodeKind::Maximum).unwrap();
        assert!(matches!(h.add_arc(1, 9), Err(MscError::InvalidReference { id: 9 })));
        assert!(h.add_node(1, 0.0, NodeKind::Maximum).is_err());
        h.construct_hierarchy(1.0, Recoverability::Recoverable, Direction::Ascending)
            .unwrap();
        assert!(h
            .construct_hierarchy(1.0, Recoverability::Recoverable, Direction::Ascending)
            .is_err());

        let mut log = EventLog::new();
        assert!(matches!(log.add_arc(4, 5), Err(MscError::InvalidReference { id: 4 })));
    }
}
