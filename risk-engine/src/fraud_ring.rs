//! Fraud ring detection
//!
//! Builds a directed relationship graph over a snapshot of actors and
//! extracts strongly connected components. A component of two or more
//! actors means every member can reach every other member through shared
//! instruments, devices or referrals. Singletons carry no signal and are
//! dropped.
//!
//! Batch-only: run over a full snapshot on its own schedule, never per
//! transaction.

use crate::types::FraudRing;
use crate::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Why two actors are related
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    SharedPaymentInstrument,
    SharedDevice,
    Referral,
}

/// Directed edge between two actor indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub from: usize,
    pub to: usize,
    pub kind: RelationKind,
}

impl RelationshipEdge {
    pub fn new(from: usize, to: usize, kind: RelationKind) -> Self {
        Self { from, to, kind }
    }
}

/// SCC-based fraud ring detector
pub struct FraudRingDetector;

impl FraudRingDetector {
    /// Find every cluster of mutually reachable actors among `actor_count` actors
    ///
    /// Rings list their members in ascending order and are sorted by their
    /// smallest member. An edge naming an actor outside `0..actor_count` is
    /// rejected.
    pub fn detect(actor_count: usize, edges: &[RelationshipEdge]) -> Result<Vec<FraudRing>> {
        let graph = Self::build_graph(actor_count, edges)?;

        let mut rings: Vec<FraudRing> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut members: Vec<usize> = component.iter().map(|idx| idx.index()).collect();
                members.sort_unstable();
                FraudRing { members }
            })
            .collect();

        rings.sort_by_key(|ring| ring.members[0]);

        info!(
            actors = actor_count,
            edges = edges.len(),
            rings = rings.len(),
            "Fraud ring scan complete"
        );

        Ok(rings)
    }

    fn build_graph(
        actor_count: usize,
        edges: &[RelationshipEdge],
    ) -> Result<DiGraph<(), RelationKind>> {
        let mut graph = DiGraph::with_capacity(actor_count, edges.len());
        let nodes: Vec<NodeIndex> = (0..actor_count).map(|_| graph.add_node(())).collect();

        for edge in edges {
            let (Some(&from), Some(&to)) = (nodes.get(edge.from), nodes.get(edge.to)) else {
                return Err(Error::Validation(format!(
                    "edge {} -> {} references an actor outside 0..{}",
                    edge.from, edge.to, actor_count
                )));
            };
            graph.add_edge(from, to, edge.kind);
        }

        Ok(graph)
    }
}

/// Interns string actor ids into the dense indices the detector works on
#[derive(Debug, Default)]
pub struct RelationshipGraphBuilder {
    // Map: actor_id -> index
    index: HashMap<String, usize>,
    actors: Vec<String>,
    edges: Vec<RelationshipEdge>,
}

impl RelationshipGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directed relationship, registering both actors if needed
    pub fn relate(&mut self, from: &str, to: &str, kind: RelationKind) -> &mut Self {
        let from = self.intern(from);
        let to = self.intern(to);
        self.edges.push(RelationshipEdge::new(from, to, kind));
        self
    }

    /// Add a relationship in both directions (shared instrument or device)
    pub fn relate_both(&mut self, a: &str, b: &str, kind: RelationKind) -> &mut Self {
        self.relate(a, b, kind).relate(b, a, kind)
    }

    /// Register an actor with no relationships yet
    pub fn actor(&mut self, actor_id: &str) -> &mut Self {
        self.intern(actor_id);
        self
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Run detection and report rings by actor id
    pub fn detect(&self) -> Result<Vec<FraudRing<String>>> {
        let rings = FraudRingDetector::detect(self.actors.len(), &self.edges)?;
        Ok(rings
            .into_iter()
            .map(|ring| {
                let mut members: Vec<String> = ring
                    .members
                    .iter()
                    .map(|&idx| self.actors[idx].clone())
                    .collect();
                members.sort();
                FraudRing { members }
            })
            .collect())
    }

    fn intern(&mut self, actor_id: &str) -> usize {
        if let Some(&idx) = self.index.get(actor_id) {
            return idx;
        }
        let idx = self.actors.len();
        self.actors.push(actor_id.to_string());
        self.index.insert(actor_id.to_string(), idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(nodes: &[usize]) -> Vec<RelationshipEdge> {
        nodes
            .iter()
            .zip(nodes.iter().cycle().skip(1))
            .map(|(&a, &b)| RelationshipEdge::new(a, b, RelationKind::SharedDevice))
            .collect()
    }

    #[test]
    fn test_acyclic_graph_has_no_rings() {
        let edges = vec![
            RelationshipEdge::new(0, 1, RelationKind::Referral),
            RelationshipEdge::new(1, 2, RelationKind::Referral),
            RelationshipEdge::new(0, 2, RelationKind::Referral),
        ];
        let rings = FraudRingDetector::detect(4, &edges).unwrap();
        assert!(rings.is_empty());
    }

    #[test]
    fn test_single_cycle_among_six() {
        let rings = FraudRingDetector::detect(6, &cycle(&[1, 3, 5])).unwrap();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].members, vec![1, 3, 5]);
    }

    #[test]
    fn test_two_disjoint_cycles() {
        let mut edges = cycle(&[0, 1, 2]);
        edges.extend(cycle(&[3, 4, 5]));
        let rings = FraudRingDetector::detect(6, &edges).unwrap();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0].members, vec![0, 1, 2]);
        assert_eq!(rings[1].members, vec![3, 4, 5]);
    }

    #[test]
    fn test_self_loop_is_not_a_ring() {
        let edges = vec![RelationshipEdge::new(2, 2, RelationKind::Referral)];
        assert!(FraudRingDetector::detect(3, &edges).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_edge() {
        let edges = vec![RelationshipEdge::new(0, 7, RelationKind::Referral)];
        assert!(matches!(
            FraudRingDetector::detect(3, &edges),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(FraudRingDetector::detect(0, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_builder_reports_actor_ids() {
        let mut builder = RelationshipGraphBuilder::new();
        builder
            .relate_both("carol", "alice", RelationKind::SharedPaymentInstrument)
            .relate("bob", "dave", RelationKind::Referral)
            .actor("erin");

        let rings = builder.detect().unwrap();
        assert_eq!(builder.actor_count(), 5);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].members, vec!["alice".to_string(), "carol".to_string()]);
    }
}
