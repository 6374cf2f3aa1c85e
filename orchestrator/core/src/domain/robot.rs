// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Robot Aggregate (Motion Context)
//!
//! Per-robot motion state. Robots are owned and mutated exclusively by the
//! fleet manager and the traffic manager; collaborators only ever see
//! [`crate::domain::snapshot::RobotSnapshot`] copies.
//!
//! ## State Transition Table
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | Idle, Complete, Moving, Waiting, Blocked, Error | Moving | task assigned with a non-empty route |
//! | Idle, Complete, Moving, Waiting, Blocked, Error | Complete | task to the current vertex, or arrival |
//! | any | Error | planning failure or internal invariant violation |
//! | Moving, Waiting | Waiting | next segment held by another robot |
//! | Waiting | Moving | segment granted |
//! | Waiting | Blocked | stall counter above threshold |
//! | Blocked | Waiting | task cancelled mid-edge; the robot retries its last hop |
//! | Moving, Waiting, Blocked, Complete, Error | Idle | task cancelled, or arrival after a mid-edge cancel |
//!
//! Idle is initial. Complete and Error hold until a new task or removal.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

use crate::domain::nav_graph::{EdgeId, NavGraph, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotId(pub u64);

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Idle,
    Moving,
    Waiting,
    Blocked,
    Complete,
    Error,
}

impl RobotState {
    pub const ALL: [RobotState; 6] = [
        RobotState::Idle,
        RobotState::Moving,
        RobotState::Waiting,
        RobotState::Blocked,
        RobotState::Complete,
        RobotState::Error,
    ];

    /// States the traffic manager evaluates every tick.
    pub fn is_active(self) -> bool {
        matches!(self, RobotState::Moving | RobotState::Waiting)
    }

    pub fn can_transition_to(self, next: RobotState) -> bool {
        use RobotState::*;
        match (self, next) {
            (_, Error) => true,
            (Idle | Complete | Moving | Waiting | Blocked | Error, Moving) => true,
            (Idle | Complete | Moving | Waiting | Blocked | Error, Complete) => true,
            (Moving | Waiting, Waiting) => true,
            (Waiting, Blocked) => true,
            (Blocked, Waiting) => true,
            (Moving | Waiting | Blocked | Complete | Error, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RobotState::Idle => "IDLE",
            RobotState::Moving => "MOVING",
            RobotState::Waiting => "WAITING",
            RobotState::Blocked => "BLOCKED",
            RobotState::Complete => "COMPLETE",
            RobotState::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Robot {robot} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub robot: RobotId,
    pub from: RobotState,
    pub to: RobotState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    state: RobotState,
    /// Departure vertex while on an edge, otherwise the vertex the robot is at.
    current_vertex: VertexId,
    current_edge: Option<EdgeId>,
    progress: f64,
    destination: Option<VertexId>,
    /// Vertices still to visit; the front is the next hop.
    path: VecDeque<VertexId>,
    stall_ticks: u32,
    speed: f64,
    last_error: Option<String>,
    deployed_at_tick: u64,
}

impl Robot {
    pub fn new(id: RobotId, vertex: VertexId, speed: f64, deployed_at_tick: u64) -> Self {
        Self {
            id,
            state: RobotState::Idle,
            current_vertex: vertex,
            current_edge: None,
            progress: 0.0,
            destination: None,
            path: VecDeque::new(),
            stall_ticks: 0,
            speed,
            last_error: None,
            deployed_at_tick,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn current_vertex(&self) -> VertexId {
        self.current_vertex
    }

    pub fn current_edge(&self) -> Option<EdgeId> {
        self.current_edge
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn destination(&self) -> Option<VertexId> {
        self.destination
    }

    pub fn next_vertex(&self) -> Option<VertexId> {
        self.path.front().copied()
    }

    pub fn path(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.path.iter().copied()
    }

    pub fn stall_ticks(&self) -> u32 {
        self.stall_ticks
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn deployed_at_tick(&self) -> u64 {
        self.deployed_at_tick
    }

    /// Vertex a new route has to start from: the far end of the current
    /// edge while in transit, the current vertex otherwise.
    pub fn planning_origin(&self) -> VertexId {
        match (self.current_edge, self.path.front()) {
            (Some(_), Some(far)) => *far,
            _ => self.current_vertex,
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: RobotState) -> Result<RobotState, TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                robot: self.id,
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Install a freshly planned route. `remaining` excludes the vertex the
    /// robot stands on but keeps the far vertex of an edge in transit.
    pub fn assign_route(&mut self, destination: VertexId, remaining: Vec<VertexId>) {
        self.destination = Some(destination);
        self.path = remaining.into();
        self.stall_ticks = 0;
        self.last_error = None;
    }

    pub fn begin_edge(&mut self, edge: EdgeId) {
        self.current_edge = Some(edge);
        self.progress = 0.0;
    }

    /// Add `step` to the edge progress, clamped to 1.0. Never decreases.
    pub fn advance(&mut self, step: f64) -> f64 {
        if step.is_finite() && step > 0.0 {
            self.progress = (self.progress + step).min(1.0);
        }
        self.progress
    }

    /// Step off the current edge onto the next vertex of the path.
    pub fn arrive(&mut self) -> Option<VertexId> {
        let reached = self.path.pop_front()?;
        self.current_vertex = reached;
        self.current_edge = None;
        self.progress = 0.0;
        Some(reached)
    }

    /// Mark the active task as finished at the current vertex.
    pub fn finish_task(&mut self) {
        self.destination = None;
        self.path.clear();
        self.stall_ticks = 0;
    }

    pub fn record_stall(&mut self) -> u32 {
        self.stall_ticks = self.stall_ticks.saturating_add(1);
        self.stall_ticks
    }

    pub fn reset_stall(&mut self) {
        self.stall_ticks = 0;
    }

    /// Drop the task. A robot in transit keeps only the far vertex of its
    /// edge so it can finish the hop instead of stopping mid-lane.
    pub fn cancel(&mut self) {
        self.destination = None;
        self.stall_ticks = 0;
        if self.current_edge.is_some() {
            self.path.truncate(1);
        } else {
            self.path.clear();
        }
        self.last_error = None;
    }

    /// Step back off the current edge onto its departure vertex, dropping the
    /// route. Returns the edge that was left.
    pub fn abandon_edge(&mut self) -> Option<EdgeId> {
        let edge = self.current_edge.take()?;
        self.progress = 0.0;
        self.path.clear();
        Some(edge)
    }

    /// Record a failure. Like [`Robot::cancel`], a robot in transit keeps
    /// the far vertex so a later task can be planned from it.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.cancel();
        self.last_error = Some(reason.into());
    }

    /// Display coordinates, interpolated along the current edge.
    pub fn display_position(&self, graph: &NavGraph) -> Option<(f64, f64)> {
        let origin = graph.position(self.current_vertex)?;
        let target = match (self.current_edge, self.path.front()) {
            (Some(_), Some(far)) => graph.position(*far)?,
            _ => return Some(origin),
        };
        Some((
            origin.0 + (target.0 - origin.0) * self.progress,
            origin.1 + (target.1 - origin.1) * self.progress,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::nav_graph::GraphDefinition;

    fn robot() -> Robot {
        Robot::new(RobotId(1), VertexId(0), 0.8, 0)
    }

    #[test]
    fn test_new_robot_is_idle_without_path() {
        let robot = robot();
        assert_eq!(robot.state(), RobotState::Idle);
        assert_eq!(robot.current_vertex(), VertexId(0));
        assert_eq!(robot.path().count(), 0);
        assert!(robot.destination().is_none());
    }

    #[test]
    fn test_transition_table() {
        use RobotState::*;
        assert!(Idle.can_transition_to(Moving));
        assert!(Moving.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Blocked));
        assert!(Waiting.can_transition_to(Moving));
        assert!(Moving.can_transition_to(Complete));
        assert!(Complete.can_transition_to(Moving));
        assert!(Blocked.can_transition_to(Error));

        assert!(!Idle.can_transition_to(Waiting));
        assert!(!Moving.can_transition_to(Blocked));
        assert!(!Complete.can_transition_to(Blocked));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn test_invalid_transition_is_rejected_without_change() {
        let mut robot = robot();
        let err = robot.transition(RobotState::Blocked).unwrap_err();
        assert_eq!(err.from, RobotState::Idle);
        assert_eq!(err.to, RobotState::Blocked);
        assert_eq!(robot.state(), RobotState::Idle);
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let mut robot = robot();
        robot.assign_route(VertexId(1), vec![VertexId(1)]);
        robot.begin_edge(EdgeId(0));
        assert_eq!(robot.advance(0.4), 0.4);
        assert_eq!(robot.advance(-1.0), 0.4);
        assert_eq!(robot.advance(f64::NAN), 0.4);
        assert_eq!(robot.advance(5.0), 1.0);
    }

    #[test]
    fn test_arrive_pops_path() {
        let mut robot = robot();
        robot.assign_route(VertexId(2), vec![VertexId(1), VertexId(2)]);
        robot.begin_edge(EdgeId(0));
        robot.advance(1.0);

        assert_eq!(robot.arrive(), Some(VertexId(1)));
        assert_eq!(robot.current_vertex(), VertexId(1));
        assert!(robot.current_edge().is_none());
        assert_eq!(robot.next_vertex(), Some(VertexId(2)));
    }

    #[test]
    fn test_cancel_in_transit_keeps_far_vertex() {
        let mut robot = robot();
        robot.assign_route(VertexId(3), vec![VertexId(1), VertexId(2), VertexId(3)]);
        robot.begin_edge(EdgeId(0));
        robot.cancel();

        assert_eq!(robot.path().collect::<Vec<_>>(), vec![VertexId(1)]);
        assert!(robot.destination().is_none());
        assert_eq!(robot.planning_origin(), VertexId(1));
    }

    #[test]
    fn test_display_position_interpolates() {
        let graph = NavGraph::from_definition(
            GraphDefinition::default()
                .vertex(0, (0.0, 0.0))
                .vertex(1, (10.0, 0.0))
                .lane(0, 0, 1, 10.0),
        )
        .unwrap();

        let mut robot = robot();
        assert_eq!(robot.display_position(&graph), Some((0.0, 0.0)));

        robot.assign_route(VertexId(1), vec![VertexId(1)]);
        robot.begin_edge(EdgeId(0));
        robot.advance(0.25);
        assert_eq!(robot.display_position(&graph), Some((2.5, 0.0)));
    }
}
