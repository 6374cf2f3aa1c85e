// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Path Planner Domain Service
//!
//! Shortest weighted path search over a [`NavGraph`]. Plans are topological,
//! not temporal: occupancy is ignored here and arbitrated later by the
//! traffic manager.
//!
//! Determinism: the frontier pops the cheapest vertex first and the lowest
//! vertex id among equal costs; when two predecessors reach a vertex at the
//! same cost, the lower predecessor id is kept.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use thiserror::Error;
use tracing::trace;

use crate::domain::nav_graph::{NavGraph, VertexId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Unknown vertex {0}")]
    UnknownVertex(VertexId),

    #[error("No path from {from} to {to}")]
    NoPath { from: VertexId, to: VertexId },
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    cost: f64,
    vertex: VertexId,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both keys for min-heap behaviour
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stateless Dijkstra planner; safe to share between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathPlanner;

impl PathPlanner {
    /// Vertex sequence from `from` to `to`, both inclusive.
    /// `from == to` yields a single-element path.
    pub fn plan(graph: &NavGraph, from: VertexId, to: VertexId) -> Result<Vec<VertexId>, PlanError> {
        if !graph.contains_vertex(from) {
            return Err(PlanError::UnknownVertex(from));
        }
        if !graph.contains_vertex(to) {
            return Err(PlanError::UnknownVertex(to));
        }
        if from == to {
            return Ok(vec![from]);
        }

        let mut frontier = BinaryHeap::new();
        let mut settled: BTreeSet<VertexId> = BTreeSet::new();
        let mut best: BTreeMap<VertexId, f64> = BTreeMap::new();
        let mut came_from: BTreeMap<VertexId, VertexId> = BTreeMap::new();

        best.insert(from, 0.0);
        frontier.push(FrontierEntry { cost: 0.0, vertex: from });

        while let Some(FrontierEntry { cost, vertex }) = frontier.pop() {
            if !settled.insert(vertex) {
                continue;
            }
            if vertex == to {
                break;
            }

            for edge in graph.edges_from(vertex) {
                let next = edge.to;
                if settled.contains(&next) {
                    continue;
                }
                let candidate = cost + edge.weight;
                match best.get(&next) {
                    Some(&known) if candidate > known => {}
                    Some(&known) if candidate == known => {
                        if came_from.get(&next).is_some_and(|prev| vertex < *prev) {
                            came_from.insert(next, vertex);
                        }
                    }
                    _ => {
                        best.insert(next, candidate);
                        came_from.insert(next, vertex);
                        frontier.push(FrontierEntry {
                            cost: candidate,
                            vertex: next,
                        });
                    }
                }
            }
        }

        if !settled.contains(&to) {
            trace!(%from, %to, explored = settled.len(), "No path found");
            return Err(PlanError::NoPath { from, to });
        }

        let mut path = vec![to];
        let mut cursor = to;
        while let Some(prev) = came_from.get(&cursor) {
            path.push(*prev);
            cursor = *prev;
        }
        path.reverse();
        Ok(path)
    }
}
