// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Traffic Manager
//!
//! Owns the reservation table and decides, robot by robot, whether the next
//! segment may be entered. Capacity is exactly one per segment: the table is
//! keyed by [`Segment`], so a second holder can never be recorded.
//!
//! Per robot and tick:
//!
//! 1. Robots that are not Moving or Waiting are skipped.
//! 2. On an edge, progress grows by `speed * dt / weight`. As soon as it is
//!    positive the departure vertex is released.
//! 3. At the end of an edge the far vertex is requested if it is exclusive.
//!    By default every vertex is; a junction degree threshold can relax this.
//!    Once granted the edge is released and the robot arrives; it may take
//!    its next edge within the same tick.
//! 4. At a vertex the next edge is requested. With lane exclusion an edge is
//!    also unavailable while its reverse twin is held.
//! 5. Each denial counts as a stalled tick. Past the stall threshold the
//!    robot is Blocked and one [`FleetEvent::TrafficConflict`] is raised.

use metrics::counter;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::events::FleetEvent;
use crate::domain::fleet_config::{TieBreakPolicy, TrafficConfig};
use crate::domain::nav_graph::{EdgeId, GraphError, NavGraph, VertexId};
use crate::domain::reservation::{Reservation, Segment};
use crate::domain::robot::{Robot, RobotId, RobotState, TransitionError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrafficError {
    #[error("Robot {robot} has no edge from {from} to {to} on its path")]
    MissingEdge {
        robot: RobotId,
        from: VertexId,
        to: VertexId,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Robot {robot} tried to release {segment} held by {holder}")]
    ForeignRelease {
        robot: RobotId,
        segment: Segment,
        holder: RobotId,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Held { holder: RobotId },
}

#[derive(Debug, Clone)]
pub struct TrafficManager {
    reservations: BTreeMap<Segment, Reservation>,
    config: TrafficConfig,
    pending: Vec<FleetEvent>,
}

impl TrafficManager {
    pub fn new(config: TrafficConfig) -> Self {
        Self {
            reservations: BTreeMap::new(),
            config,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrafficConfig {
        &self.config
    }

    pub fn is_exclusive(&self, graph: &NavGraph, vertex: VertexId) -> bool {
        graph.is_junction(vertex, self.config.junction_min_degree)
    }

    pub fn holder(&self, segment: Segment) -> Option<RobotId> {
        self.reservations.get(&segment).map(|r| r.held_by)
    }

    /// Reservations in segment order.
    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn held_by(&self, robot: RobotId) -> Vec<Segment> {
        self.reservations
            .values()
            .filter(|r| r.held_by == robot)
            .map(|r| r.segment)
            .collect()
    }

    /// Events produced since the last drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<FleetEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Claim the deployment vertex when it is exclusive. Returns the holder
    /// when another robot already occupies it.
    pub fn claim_deployment(
        &mut self,
        graph: &NavGraph,
        robot: RobotId,
        vertex: VertexId,
        tick: u64,
    ) -> Result<(), RobotId> {
        if !self.is_exclusive(graph, vertex) {
            return Ok(());
        }
        match self.try_reserve(Segment::Vertex(vertex), robot, tick) {
            Grant::Granted => Ok(()),
            Grant::Held { holder } => Err(holder),
        }
    }

    /// Reserve `segment` for `robot` unless someone else holds it.
    /// Re-requesting an own reservation is granted without a new event.
    pub fn try_reserve(&mut self, segment: Segment, robot: RobotId, tick: u64) -> Grant {
        match self.reservations.get(&segment) {
            Some(existing) if existing.held_by == robot => Grant::Granted,
            Some(existing) => {
                counter!("waypoint_reservations_denied_total").increment(1);
                Grant::Held {
                    holder: existing.held_by,
                }
            }
            None => {
                self.reservations.insert(
                    segment,
                    Reservation {
                        segment,
                        held_by: robot,
                        acquired_tick: tick,
                    },
                );
                counter!("waypoint_reservations_granted_total").increment(1);
                debug!(%robot, %segment, tick, "Reservation granted");
                self.pending
                    .push(FleetEvent::ReservationAcquired { robot, segment });
                Grant::Granted
            }
        }
    }

    /// Release `segment`. Releasing a free segment is a no-op and returns
    /// `false`; releasing someone else's reservation is an error.
    pub fn release(&mut self, segment: Segment, robot: RobotId) -> Result<bool, TrafficError> {
        match self.reservations.get(&segment) {
            None => Ok(false),
            Some(existing) if existing.held_by != robot => Err(TrafficError::ForeignRelease {
                robot,
                segment,
                holder: existing.held_by,
            }),
            Some(_) => {
                self.reservations.remove(&segment);
                debug!(%robot, %segment, "Reservation released");
                self.pending
                    .push(FleetEvent::ReservationReleased { robot, segment });
                Ok(true)
            }
        }
    }

    /// Drop every reservation held by `robot`, returning what was freed.
    pub fn release_all(&mut self, robot: RobotId) -> Vec<Segment> {
        let freed = self.held_by(robot);
        for segment in &freed {
            self.reservations.remove(segment);
            self.pending
                .push(FleetEvent::ReservationReleased { robot, segment: *segment });
        }
        freed
    }

    /// Another robot occupying `edge` or, with lane exclusion, its twin.
    pub fn edge_holder(&self, graph: &NavGraph, edge: EdgeId, robot: RobotId) -> Option<RobotId> {
        let foreign = |segment: Segment| self.holder(segment).filter(|holder| *holder != robot);

        if let Some(holder) = foreign(Segment::Edge(edge)) {
            return Some(holder);
        }
        if !self.config.lane_exclusive {
            return None;
        }
        graph
            .edge(edge)
            .ok()
            .and_then(|e| e.reverse)
            .and_then(|twin| foreign(Segment::Edge(twin)))
    }

    /// Order in which robots are evaluated this tick.
    pub fn processing_order<'a>(&self, robots: impl Iterator<Item = &'a Robot>) -> Vec<RobotId> {
        let mut keyed: Vec<(u32, RobotId)> =
            robots.map(|robot| (robot.stall_ticks(), robot.id)).collect();
        match self.config.tie_break {
            TieBreakPolicy::LowestId => keyed.sort_by_key(|(_, id)| *id),
            TieBreakPolicy::Aging => {
                keyed.sort_by(|(a_stall, a_id), (b_stall, b_id)| {
                    b_stall.cmp(a_stall).then(a_id.cmp(b_id))
                })
            }
        }
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    /// Advance one robot by one tick.
    pub fn advance(
        &mut self,
        graph: &NavGraph,
        robot: &mut Robot,
        dt: f64,
        tick: u64,
    ) -> Result<(), TrafficError> {
        if !robot.state().is_active() {
            return Ok(());
        }

        if let Some(edge_id) = robot.current_edge() {
            let edge = graph.edge(edge_id)?;
            if robot.progress() < 1.0 {
                robot.advance(robot.speed() * dt / edge.weight);
                if robot.progress() > 0.0 {
                    self.release_departure(robot)?;
                }
                if robot.progress() < 1.0 {
                    return Ok(());
                }
            }

            let far = edge.to;
            if self.is_exclusive(graph, far) {
                if let Grant::Held { holder } = self.try_reserve(Segment::Vertex(far), robot.id, tick) {
                    return self.wait(robot, Segment::Vertex(far), holder);
                }
            }

            self.release(Segment::Edge(edge_id), robot.id)?;
            robot.arrive();
            robot.reset_stall();
            debug!(robot = %robot.id, vertex = %far, "Robot arrived at vertex");
        }

        let Some(next) = robot.next_vertex() else {
            return self.finish(robot);
        };

        let from = robot.current_vertex();
        let edge = graph
            .edge_between(from, next)
            .ok_or(TrafficError::MissingEdge {
                robot: robot.id,
                from,
                to: next,
            })?;

        if let Some(holder) = self.edge_holder(graph, edge.id, robot.id) {
            return self.wait(robot, Segment::Edge(edge.id), holder);
        }
        if let Grant::Held { holder } = self.try_reserve(Segment::Edge(edge.id), robot.id, tick) {
            return self.wait(robot, Segment::Edge(edge.id), holder);
        }

        robot.begin_edge(edge.id);
        robot.reset_stall();
        self.set_state(robot, RobotState::Moving)
    }

    fn release_departure(&mut self, robot: &Robot) -> Result<(), TrafficError> {
        let departure = Segment::Vertex(robot.current_vertex());
        if self.holder(departure) == Some(robot.id) {
            self.release(departure, robot.id)?;
        }
        Ok(())
    }

    fn wait(&mut self, robot: &mut Robot, segment: Segment, holder: RobotId) -> Result<(), TrafficError> {
        let stalled = robot.record_stall();
        self.set_state(robot, RobotState::Waiting)?;
        debug!(robot = %robot.id, %segment, %holder, stalled, "Robot waiting for segment");

        if stalled > self.config.stall_threshold {
            self.set_state(robot, RobotState::Blocked)?;
            counter!("waypoint_traffic_conflicts_total").increment(1);
            warn!(
                robot = %robot.id,
                %holder,
                %segment,
                stalled,
                "Robot blocked by traffic conflict"
            );
            self.pending.push(FleetEvent::TrafficConflict {
                robots: vec![robot.id, holder],
                segment,
            });
        }
        Ok(())
    }

    /// The path ran out: the task is complete, or the robot was cancelled
    /// mid-edge and now rests.
    fn finish(&mut self, robot: &mut Robot) -> Result<(), TrafficError> {
        let vertex = robot.current_vertex();
        let had_task = robot.destination().is_some();
        robot.finish_task();
        if had_task {
            self.set_state(robot, RobotState::Complete)?;
            self.pending.push(FleetEvent::TaskCompleted {
                robot: robot.id,
                vertex,
            });
        } else {
            self.set_state(robot, RobotState::Idle)?;
        }
        Ok(())
    }

    fn set_state(&mut self, robot: &mut Robot, to: RobotState) -> Result<(), TrafficError> {
        if robot.state() == to {
            return Ok(());
        }
        let from = robot.transition(to)?;
        self.pending.push(FleetEvent::StateChanged {
            robot: robot.id,
            from,
            to,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nav_graph::GraphDefinition;

    fn line() -> NavGraph {
        NavGraph::from_definition(
            GraphDefinition::default()
                .vertex(0, (0.0, 0.0))
                .vertex(1, (1.0, 0.0))
                .vertex(2, (2.0, 0.0))
                .lane(0, 0, 1, 1.0)
                .lane(1, 1, 2, 1.0),
        )
        .unwrap()
    }

    /// Center 0 with leaves 1, 2, 3: the center is a junction.
    fn star() -> NavGraph {
        NavGraph::from_definition(
            GraphDefinition::default()
                .vertex(0, (0.0, 0.0))
                .vertex(1, (-1.0, 0.0))
                .vertex(2, (1.0, 0.0))
                .vertex(3, (0.0, 1.0))
                .lane(0, 1, 0, 1.0)
                .lane(1, 0, 2, 1.0)
                .lane(2, 0, 3, 1.0),
        )
        .unwrap()
    }

    fn moving_robot(id: u64, at: u64, route: &[u64]) -> Robot {
        let mut robot = Robot::new(RobotId(id), VertexId(at), 1.0, 0);
        let route: Vec<VertexId> = route.iter().copied().map(VertexId).collect();
        let destination = *route.last().unwrap();
        robot.assign_route(destination, route);
        robot.transition(RobotState::Moving).unwrap();
        robot
    }

    #[test]
    fn test_reserve_and_release() {
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        let segment = Segment::Edge(EdgeId(0));

        assert_eq!(traffic.try_reserve(segment, RobotId(1), 0), Grant::Granted);
        assert_eq!(traffic.try_reserve(segment, RobotId(1), 1), Grant::Granted);
        assert_eq!(
            traffic.try_reserve(segment, RobotId(2), 1),
            Grant::Held { holder: RobotId(1) }
        );
        assert_eq!(traffic.reservation_count(), 1);

        assert!(matches!(
            traffic.release(segment, RobotId(2)),
            Err(TrafficError::ForeignRelease { holder: RobotId(1), .. })
        ));
        assert_eq!(traffic.release(segment, RobotId(1)), Ok(true));
        assert_eq!(traffic.release(segment, RobotId(1)), Ok(false));

        let events = traffic.drain_events();
        assert_eq!(events.len(), 2);
        assert!(traffic.drain_events().is_empty());
    }

    #[test]
    fn test_lane_exclusion_covers_reverse_twin() {
        let graph = line();
        let twin = graph.edge(EdgeId(0)).unwrap().reverse.unwrap();

        let mut traffic = TrafficManager::new(TrafficConfig::default());
        traffic.try_reserve(Segment::Edge(EdgeId(0)), RobotId(1), 0);
        assert_eq!(traffic.edge_holder(&graph, twin, RobotId(2)), Some(RobotId(1)));
        assert_eq!(traffic.edge_holder(&graph, twin, RobotId(1)), None);

        let mut relaxed = TrafficManager::new(TrafficConfig {
            lane_exclusive: false,
            ..TrafficConfig::default()
        });
        relaxed.try_reserve(Segment::Edge(EdgeId(0)), RobotId(1), 0);
        assert_eq!(relaxed.edge_holder(&graph, twin, RobotId(2)), None);
    }

    #[test]
    fn test_robot_travels_to_destination() {
        let graph = line();
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        let mut robot = moving_robot(1, 0, &[1, 2]);

        // 1: take E0, 2: half way, 3: arrive at L1 and take E1, 4: half way, 5: arrive
        for _ in 0..4 {
            traffic.advance(&graph, &mut robot, 0.5, 0).unwrap();
            assert_eq!(robot.state(), RobotState::Moving);
        }
        assert_eq!(robot.current_vertex(), VertexId(1));
        assert_eq!(robot.progress(), 0.5);

        traffic.advance(&graph, &mut robot, 0.5, 0).unwrap();
        assert_eq!(robot.state(), RobotState::Complete);
        assert_eq!(robot.current_vertex(), VertexId(2));
        // the robot keeps the vertex it stands on and nothing else
        assert_eq!(traffic.held_by(RobotId(1)), vec![Segment::Vertex(VertexId(2))]);
        assert_eq!(traffic.reservation_count(), 1);

        let events = traffic.drain_events();
        assert!(events.contains(&FleetEvent::TaskCompleted {
            robot: RobotId(1),
            vertex: VertexId(2)
        }));

        // Complete robots are skipped
        traffic.advance(&graph, &mut robot, 0.5, 0).unwrap();
        assert!(traffic.drain_events().is_empty());
    }

    #[test]
    fn test_occupied_junction_blocks_after_threshold() {
        let graph = star();
        let mut traffic = TrafficManager::new(TrafficConfig {
            stall_threshold: 2,
            ..TrafficConfig::default()
        });
        traffic
            .claim_deployment(&graph, RobotId(2), VertexId(0), 0)
            .unwrap();
        let mut robot = moving_robot(1, 1, &[0]);

        // Reach the end of the edge: take E0, then progress to 1.0
        traffic.advance(&graph, &mut robot, 1.0, 0).unwrap();
        traffic.advance(&graph, &mut robot, 1.0, 1).unwrap();
        assert_eq!(robot.state(), RobotState::Waiting);
        assert_eq!(robot.progress(), 1.0);
        assert_eq!(robot.stall_ticks(), 1);

        traffic.advance(&graph, &mut robot, 1.0, 2).unwrap();
        assert_eq!(robot.state(), RobotState::Waiting);
        traffic.advance(&graph, &mut robot, 1.0, 3).unwrap();
        assert_eq!(robot.state(), RobotState::Blocked);

        let conflicts: Vec<_> = traffic
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, FleetEvent::TrafficConflict { .. }))
            .collect();
        assert_eq!(
            conflicts,
            vec![FleetEvent::TrafficConflict {
                robots: vec![RobotId(1), RobotId(2)],
                segment: Segment::Vertex(VertexId(0)),
            }]
        );
        assert_eq!(traffic.holder(Segment::Vertex(VertexId(0))), Some(RobotId(2)));
    }

    #[test]
    fn test_departure_junction_released_once_moving() {
        let graph = star();
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        traffic
            .claim_deployment(&graph, RobotId(1), VertexId(0), 0)
            .unwrap();
        let mut robot = moving_robot(1, 0, &[2]);

        traffic.advance(&graph, &mut robot, 0.25, 1).unwrap();
        assert_eq!(traffic.holder(Segment::Vertex(VertexId(0))), Some(RobotId(1)));

        traffic.advance(&graph, &mut robot, 0.25, 2).unwrap();
        assert_eq!(traffic.holder(Segment::Vertex(VertexId(0))), None);
    }

    #[test]
    fn test_deployment_on_held_vertex_reports_holder() {
        let graph = star();
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        assert!(traffic.claim_deployment(&graph, RobotId(1), VertexId(0), 0).is_ok());
        assert_eq!(
            traffic.claim_deployment(&graph, RobotId(2), VertexId(0), 0),
            Err(RobotId(1))
        );
        assert!(traffic.claim_deployment(&graph, RobotId(2), VertexId(1), 0).is_ok());
        assert_eq!(
            traffic.claim_deployment(&graph, RobotId(3), VertexId(1), 0),
            Err(RobotId(2))
        );
        assert_eq!(traffic.reservation_count(), 2);
    }

    #[test]
    fn test_junction_only_exclusion_leaves_plain_vertices_shared() {
        let graph = star();
        let mut traffic = TrafficManager::new(TrafficConfig {
            junction_min_degree: 3,
            ..TrafficConfig::default()
        });
        assert!(traffic.is_exclusive(&graph, VertexId(0)));
        assert!(!traffic.is_exclusive(&graph, VertexId(1)));

        assert!(traffic.claim_deployment(&graph, RobotId(1), VertexId(1), 0).is_ok());
        assert!(traffic.claim_deployment(&graph, RobotId(2), VertexId(1), 0).is_ok());
        assert_eq!(traffic.reservation_count(), 0);
    }

    #[test]
    fn test_robot_cannot_enter_occupied_plain_vertex() {
        let graph = line();
        let mut traffic = TrafficManager::new(TrafficConfig {
            stall_threshold: 1,
            ..TrafficConfig::default()
        });
        traffic
            .claim_deployment(&graph, RobotId(2), VertexId(1), 0)
            .unwrap();
        let mut robot = moving_robot(1, 0, &[1, 2]);

        for tick in 0..6 {
            traffic.advance(&graph, &mut robot, 1.0, tick).unwrap();
            assert_eq!(robot.current_vertex(), VertexId(0));
        }
        assert_eq!(robot.state(), RobotState::Blocked);
        assert_eq!(robot.progress(), 1.0);
        assert_eq!(traffic.holder(Segment::Vertex(VertexId(1))), Some(RobotId(2)));
    }

    #[test]
    fn test_missing_edge_is_reported() {
        let graph = line();
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        let mut robot = moving_robot(1, 0, &[2]);

        assert_eq!(
            traffic.advance(&graph, &mut robot, 0.5, 0),
            Err(TrafficError::MissingEdge {
                robot: RobotId(1),
                from: VertexId(0),
                to: VertexId(2),
            })
        );
    }

    #[test]
    fn test_processing_order_policies() {
        let mut stalled = Robot::new(RobotId(3), VertexId(0), 1.0, 0);
        stalled.record_stall();
        stalled.record_stall();
        let mut less = Robot::new(RobotId(2), VertexId(0), 1.0, 0);
        less.record_stall();
        let fresh = Robot::new(RobotId(1), VertexId(0), 1.0, 0);
        let robots = [fresh, less, stalled];

        let lowest = TrafficManager::new(TrafficConfig::default());
        assert_eq!(
            lowest.processing_order(robots.iter()),
            vec![RobotId(1), RobotId(2), RobotId(3)]
        );

        let aging = TrafficManager::new(TrafficConfig {
            tie_break: TieBreakPolicy::Aging,
            ..TrafficConfig::default()
        });
        assert_eq!(
            aging.processing_order(robots.iter()),
            vec![RobotId(3), RobotId(2), RobotId(1)]
        );
    }

    #[test]
    fn test_release_all_frees_everything() {
        let mut traffic = TrafficManager::new(TrafficConfig::default());
        traffic.try_reserve(Segment::Vertex(VertexId(0)), RobotId(1), 0);
        traffic.try_reserve(Segment::Edge(EdgeId(3)), RobotId(1), 0);
        traffic.try_reserve(Segment::Edge(EdgeId(4)), RobotId(2), 0);

        let freed = traffic.release_all(RobotId(1));
        assert_eq!(
            freed,
            vec![Segment::Vertex(VertexId(0)), Segment::Edge(EdgeId(3))]
        );
        assert_eq!(traffic.held_by(RobotId(2)), vec![Segment::Edge(EdgeId(4))]);
    }
}
