// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Owned, serialisable views of fleet state for renderers and operators.
//! Snapshots never alias live state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::nav_graph::{EdgeId, NavGraph, VertexId};
use crate::domain::reservation::Reservation;
use crate::domain::robot::{Robot, RobotId, RobotState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub id: RobotId,
    pub state: RobotState,
    pub vertex: VertexId,
    pub edge: Option<EdgeId>,
    pub progress: f64,
    pub destination: Option<VertexId>,
    pub path: Vec<VertexId>,
    pub stall_ticks: u32,
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RobotSnapshot {
    pub fn capture(robot: &Robot, graph: &NavGraph) -> Self {
        Self {
            id: robot.id,
            state: robot.state(),
            vertex: robot.current_vertex(),
            edge: robot.current_edge(),
            progress: robot.progress(),
            destination: robot.destination(),
            path: robot.path().collect(),
            stall_ticks: robot.stall_ticks(),
            position: robot.display_position(graph),
            last_error: robot.last_error().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub tick: u64,
    /// Ascending robot id.
    pub robots: Vec<RobotSnapshot>,
    /// Ascending segment.
    pub reservations: Vec<Reservation>,
    /// Every state is present, including zero counts.
    pub status_counts: BTreeMap<RobotState, usize>,
}

impl FleetSnapshot {
    pub fn new(tick: u64, robots: Vec<RobotSnapshot>, reservations: Vec<Reservation>) -> Self {
        let mut status_counts: BTreeMap<RobotState, usize> =
            RobotState::ALL.iter().map(|state| (*state, 0)).collect();
        for robot in &robots {
            *status_counts.entry(robot.state).or_default() += 1;
        }
        Self {
            tick,
            robots,
            reservations,
            status_counts,
        }
    }

    pub fn robot(&self, id: RobotId) -> Option<&RobotSnapshot> {
        self.robots.iter().find(|robot| robot.id == id)
    }

    pub fn count(&self, state: RobotState) -> usize {
        self.status_counts.get(&state).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nav_graph::GraphDefinition;

    #[test]
    fn test_status_counts_cover_every_state() {
        let graph = NavGraph::from_definition(GraphDefinition::default().vertex(0, (0.0, 0.0)))
            .unwrap();
        let robots = vec![
            RobotSnapshot::capture(&Robot::new(RobotId(1), VertexId(0), 0.8, 0), &graph),
            RobotSnapshot::capture(&Robot::new(RobotId(2), VertexId(0), 0.8, 0), &graph),
        ];
        let snapshot = FleetSnapshot::new(7, robots, vec![]);

        assert_eq!(snapshot.status_counts.len(), RobotState::ALL.len());
        assert_eq!(snapshot.count(RobotState::Idle), 2);
        assert_eq!(snapshot.count(RobotState::Blocked), 0);
        assert_eq!(snapshot.robot(RobotId(2)).unwrap().position, Some((0.0, 0.0)));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status_counts"]["IDLE"], 2);
    }
}
