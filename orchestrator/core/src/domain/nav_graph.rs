// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Navigation Graph (Topology Context)
//!
//! Immutable-after-load model of the shared floor topology robots travel on.
//!
//! | Type | Role |
//! |------|------|
//! | [`GraphDefinition`] | Load contract produced by topology collaborators |
//! | [`NavGraph`] | Validated, read-only vertex/edge store with query helpers |
//! | [`Vertex`], [`Edge`] | Value objects exposed to planners and arbiters |
//!
//! ## Invariants
//!
//! - Every edge endpoint exists in the vertex map.
//! - Edge weights are finite and strictly positive; self loops are rejected.
//! - Once [`NavGraph::from_definition`] returns, nothing mutates the graph.
//!   Validation is all-or-nothing, so a partially loaded graph is never observable.
//!
//! Edges are directed. A bidirectional lane is two directed edges that point at
//! each other through [`Edge::reverse`]; traffic arbitration treats the pair as
//! one physical lane.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::domain::path_planner::{PathPlanner, PlanError};

/// Stable identifier of a navigation vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u64);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Stable identifier of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub name: Option<String>,
    /// Display-only coordinates; never used for arbitration.
    pub position: Option<(f64, f64)>,
    /// Outgoing edges, ordered by id.
    pub edges: BTreeSet<EdgeId>,
    /// Distinct vertices connected to this one in either direction.
    pub adjacent: BTreeSet<VertexId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: VertexId,
    pub to: VertexId,
    pub weight: f64,
    /// Opposite direction of the same physical lane, if one exists.
    pub reverse: Option<EdgeId>,
}

/// Vertex entry of a [`GraphDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexSpec {
    pub id: VertexId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
}

/// Edge entry of a [`GraphDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub id: EdgeId,
    pub from: VertexId,
    pub to: VertexId,
    pub weight: f64,
    /// Also create the opposite direction as a twin edge.
    #[serde(default)]
    pub bidirectional: bool,
}

/// Topology as supplied by a loading collaborator, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub vertices: Vec<VertexSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl GraphDefinition {
    pub fn vertex(mut self, id: u64, position: (f64, f64)) -> Self {
        self.vertices.push(VertexSpec {
            id: VertexId(id),
            name: None,
            position: Some(position),
        });
        self
    }

    pub fn lane(mut self, id: u64, from: u64, to: u64, weight: f64) -> Self {
        self.edges.push(EdgeSpec {
            id: EdgeId(id),
            from: VertexId(from),
            to: VertexId(to),
            weight,
            bidirectional: true,
        });
        self
    }

    pub fn one_way(mut self, id: u64, from: u64, to: u64, weight: f64) -> Self {
        self.edges.push(EdgeSpec {
            id: EdgeId(id),
            from: VertexId(from),
            to: VertexId(to),
            weight,
            bidirectional: false,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Unknown vertex {0}")]
    UnknownVertex(VertexId),

    #[error("Unknown edge {0}")]
    UnknownEdge(EdgeId),

    #[error("No edge connects {from} to {to}")]
    NotAdjacent { from: VertexId, to: VertexId },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),
}

#[derive(Debug, Clone)]
pub struct NavGraph {
    vertices: BTreeMap<VertexId, Vertex>,
    edges: BTreeMap<EdgeId, Edge>,
}

impl NavGraph {
    /// Validate a definition and build the graph. Rejects the whole
    /// definition on the first violation.
    pub fn from_definition(definition: GraphDefinition) -> Result<Self, GraphError> {
        let mut vertices = BTreeMap::new();
        for spec in definition.vertices {
            if vertices.contains_key(&spec.id) {
                return Err(GraphError::InvalidTopology(format!(
                    "duplicate vertex {}",
                    spec.id
                )));
            }
            vertices.insert(
                spec.id,
                Vertex {
                    id: spec.id,
                    name: spec.name,
                    position: spec.position,
                    edges: BTreeSet::new(),
                    adjacent: BTreeSet::new(),
                },
            );
        }

        // None once the id space above the highest declared edge is used up.
        let mut next_twin = definition
            .edges
            .iter()
            .map(|e| e.id.0)
            .max()
            .map_or(Some(0), |max| max.checked_add(1));

        let mut edges: BTreeMap<EdgeId, Edge> = BTreeMap::new();
        for spec in &definition.edges {
            if edges.contains_key(&spec.id) {
                return Err(GraphError::InvalidTopology(format!("duplicate edge {}", spec.id)));
            }
            for endpoint in [spec.from, spec.to] {
                if !vertices.contains_key(&endpoint) {
                    return Err(GraphError::InvalidTopology(format!(
                        "edge {} references unknown vertex {}",
                        spec.id, endpoint
                    )));
                }
            }
            if spec.from == spec.to {
                return Err(GraphError::InvalidTopology(format!(
                    "edge {} is a self loop on {}",
                    spec.id, spec.from
                )));
            }
            if !spec.weight.is_finite() || spec.weight <= 0.0 {
                return Err(GraphError::InvalidTopology(format!(
                    "edge {} has invalid weight {}",
                    spec.id, spec.weight
                )));
            }

            let twin = if spec.bidirectional {
                let id = next_twin.ok_or_else(|| {
                    GraphError::InvalidTopology(format!(
                        "no edge id left for the reverse of edge {}",
                        spec.id
                    ))
                })?;
                next_twin = id.checked_add(1);
                Some(EdgeId(id))
            } else {
                None
            };
            edges.insert(
                spec.id,
                Edge {
                    id: spec.id,
                    from: spec.from,
                    to: spec.to,
                    weight: spec.weight,
                    reverse: twin,
                },
            );
            if let Some(twin) = twin {
                edges.insert(
                    twin,
                    Edge {
                        id: twin,
                        from: spec.to,
                        to: spec.from,
                        weight: spec.weight,
                        reverse: Some(spec.id),
                    },
                );
            }
        }

        pair_opposing_edges(&mut edges);

        for edge in edges.values() {
            if let Some(vertex) = vertices.get_mut(&edge.from) {
                vertex.edges.insert(edge.id);
                vertex.adjacent.insert(edge.to);
            }
            if let Some(vertex) = vertices.get_mut(&edge.to) {
                vertex.adjacent.insert(edge.from);
            }
        }

        Ok(Self { vertices, edges })
    }

    pub fn vertex(&self, id: VertexId) -> Result<&Vertex, GraphError> {
        self.vertices.get(&id).ok_or(GraphError::UnknownVertex(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge, GraphError> {
        self.edges.get(&id).ok_or(GraphError::UnknownEdge(id))
    }

    pub fn contains_vertex(&self, id: VertexId) -> bool {
        self.vertices.contains_key(&id)
    }

    /// Outgoing `(edge, target)` pairs in edge-id order.
    pub fn neighbors(&self, id: VertexId) -> Result<Vec<(EdgeId, VertexId)>, GraphError> {
        let vertex = self.vertex(id)?;
        Ok(vertex
            .edges
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .map(|edge| (edge.id, edge.to))
            .collect())
    }

    /// Outgoing edges of `id`; empty for unknown vertices.
    pub fn edges_from(&self, id: VertexId) -> impl Iterator<Item = &Edge> + '_ {
        self.vertices
            .get(&id)
            .into_iter()
            .flat_map(|vertex| vertex.edges.iter())
            .filter_map(|edge_id| self.edges.get(edge_id))
    }

    /// Cheapest direct edge from `from` to `to`; lowest id on equal weight.
    pub fn edge_between(&self, from: VertexId, to: VertexId) -> Option<&Edge> {
        let vertex = self.vertices.get(&from)?;
        vertex
            .edges
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .filter(|edge| edge.to == to)
            .min_by(|a, b| a.weight.total_cmp(&b.weight).then(a.id.cmp(&b.id)))
    }

    /// Number of distinct vertices connected to `id` in either direction.
    pub fn degree(&self, id: VertexId) -> Result<usize, GraphError> {
        Ok(self.vertex(id)?.adjacent.len())
    }

    /// Junctions are the vertices subject to vertex-level exclusion.
    /// `min_degree == 0` makes every vertex a junction.
    pub fn is_junction(&self, id: VertexId, min_degree: usize) -> bool {
        self.vertices
            .get(&id)
            .is_some_and(|vertex| vertex.adjacent.len() >= min_degree)
    }

    pub fn position(&self, id: VertexId) -> Option<(f64, f64)> {
        self.vertices.get(&id).and_then(|vertex| vertex.position)
    }

    pub fn shortest_path(&self, from: VertexId, to: VertexId) -> Result<Vec<VertexId>, PlanError> {
        PathPlanner::plan(self, from, to)
    }

    /// Total traversal cost of a vertex sequence.
    pub fn path_weight(&self, path: &[VertexId]) -> Result<f64, GraphError> {
        path.windows(2).try_fold(0.0, |total, pair| {
            self.edge_between(pair[0], pair[1])
                .map(|edge| total + edge.weight)
                .ok_or(GraphError::NotAdjacent {
                    from: pair[0],
                    to: pair[1],
                })
        })
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Link one-way edges declared separately in both directions so they share a lane.
/// Parallel edges pair up in id order.
fn pair_opposing_edges(edges: &mut BTreeMap<EdgeId, Edge>) {
    let mut by_direction: BTreeMap<(VertexId, VertexId), Vec<EdgeId>> = BTreeMap::new();
    for edge in edges.values().filter(|edge| edge.reverse.is_none()) {
        by_direction
            .entry((edge.from, edge.to))
            .or_default()
            .push(edge.id);
    }

    let mut pairs = Vec::new();
    for ((from, to), forward) in &by_direction {
        if from > to {
            continue;
        }
        if let Some(backward) = by_direction.get(&(*to, *from)) {
            pairs.extend(forward.iter().copied().zip(backward.iter().copied()));
        }
    }

    for (a, b) in pairs {
        if let Some(edge) = edges.get_mut(&a) {
            edge.reverse = Some(b);
        }
        if let Some(edge) = edges.get_mut(&b) {
            edge.reverse = Some(a);
        }
    }
}
