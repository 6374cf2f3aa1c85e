// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::nav_graph::{EdgeId, VertexId};
use crate::domain::robot::RobotId;

/// A unit of exclusive occupancy: one vertex or one directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Segment {
    Vertex(VertexId),
    Edge(EdgeId),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Vertex(vertex) => write!(f, "vertex {vertex}"),
            Segment::Edge(edge) => write!(f, "edge {edge}"),
        }
    }
}

impl From<VertexId> for Segment {
    fn from(vertex: VertexId) -> Self {
        Segment::Vertex(vertex)
    }
}

impl From<EdgeId> for Segment {
    fn from(edge: EdgeId) -> Self {
        Segment::Edge(edge)
    }
}

/// Exclusive claim on a segment. The reservation table keys these by
/// segment, so a segment has at most one holder at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub segment: Segment,
    pub held_by: RobotId,
    pub acquired_tick: u64,
}
