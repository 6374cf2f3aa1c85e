// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::nav_graph::VertexId;
use crate::domain::reservation::Segment;
use crate::domain::robot::{RobotId, RobotState};

/// Fleet lifecycle and traffic events, in the order the fleet manager
/// produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    RobotDeployed {
        robot: RobotId,
        vertex: VertexId,
    },
    TaskAssigned {
        robot: RobotId,
        destination: VertexId,
        path: Vec<VertexId>,
    },
    StateChanged {
        robot: RobotId,
        from: RobotState,
        to: RobotState,
    },
    /// Emitted once when a stalled robot crosses the threshold.
    /// `robots[0]` is the blocked requester, `robots[1]` the holder.
    TrafficConflict {
        robots: Vec<RobotId>,
        segment: Segment,
    },
    TaskCompleted {
        robot: RobotId,
        vertex: VertexId,
    },
    TaskCancelled {
        robot: RobotId,
        vertex: VertexId,
    },
    RobotError {
        robot: RobotId,
        reason: String,
    },
    RobotRemoved {
        robot: RobotId,
        vertex: VertexId,
    },
    ReservationAcquired {
        robot: RobotId,
        segment: Segment,
    },
    ReservationReleased {
        robot: RobotId,
        segment: Segment,
    },
}

impl FleetEvent {
    pub fn involves(&self, id: RobotId) -> bool {
        match self {
            FleetEvent::TrafficConflict { robots, .. } => robots.contains(&id),
            FleetEvent::RobotDeployed { robot, .. }
            | FleetEvent::TaskAssigned { robot, .. }
            | FleetEvent::StateChanged { robot, .. }
            | FleetEvent::TaskCompleted { robot, .. }
            | FleetEvent::TaskCancelled { robot, .. }
            | FleetEvent::RobotError { robot, .. }
            | FleetEvent::RobotRemoved { robot, .. }
            | FleetEvent::ReservationAcquired { robot, .. }
            | FleetEvent::ReservationReleased { robot, .. } => *robot == id,
        }
    }

    /// Occupancy bookkeeping events are noisy; operator-facing logs skip them.
    pub fn is_reservation_change(&self) -> bool {
        matches!(
            self,
            FleetEvent::ReservationAcquired { .. } | FleetEvent::ReservationReleased { .. }
        )
    }
}

impl fmt::Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetEvent::RobotDeployed { robot, vertex } => {
                write!(f, "{robot} deployed at {vertex}")
            }
            FleetEvent::TaskAssigned {
                robot,
                destination,
                path,
            } => write!(
                f,
                "{robot} assigned to {destination} ({} hops)",
                path.len().saturating_sub(1)
            ),
            FleetEvent::StateChanged { robot, from, to } => {
                write!(f, "{robot} {from} -> {to}")
            }
            FleetEvent::TrafficConflict { robots, segment } => {
                let names: Vec<String> = robots.iter().map(ToString::to_string).collect();
                write!(f, "traffic conflict on {segment} between {}", names.join(", "))
            }
            FleetEvent::TaskCompleted { robot, vertex } => {
                write!(f, "{robot} reached {vertex}")
            }
            FleetEvent::TaskCancelled { robot, vertex } => {
                write!(f, "{robot} task cancelled near {vertex}")
            }
            FleetEvent::RobotError { robot, reason } => write!(f, "{robot} error: {reason}"),
            FleetEvent::RobotRemoved { robot, vertex } => {
                write!(f, "{robot} removed from {vertex}")
            }
            FleetEvent::ReservationAcquired { robot, segment } => {
                write!(f, "{robot} reserved {segment}")
            }
            FleetEvent::ReservationReleased { robot, segment } => {
                write!(f, "{robot} released {segment}")
            }
        }
    }
}

/// Journal entry. Sequence numbers start at 0 and have no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub tick: u64,
    pub event: FleetEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nav_graph::EdgeId;

    #[test]
    fn test_state_changed_serialization() {
        let event = FleetEvent::StateChanged {
            robot: RobotId(2),
            from: RobotState::Moving,
            to: RobotState::Waiting,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["robot"], 2);
        assert_eq!(json["to"], "WAITING");

        let parsed: FleetEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_conflict_involves_both_robots() {
        let event = FleetEvent::TrafficConflict {
            robots: vec![RobotId(1), RobotId(2)],
            segment: Segment::Edge(EdgeId(0)),
        };
        assert!(event.involves(RobotId(1)));
        assert!(event.involves(RobotId(2)));
        assert!(!event.involves(RobotId(3)));
        assert_eq!(
            event.to_string(),
            "traffic conflict on edge E0 between R1, R2"
        );
    }
}
