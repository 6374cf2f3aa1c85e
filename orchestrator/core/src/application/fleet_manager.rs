// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fleet Manager
//!
//! Single coordinating authority over robots, reservations and the event
//! journal. Every mutation goes through `&mut self`, so commands and ticks
//! can never interleave. Commands are either called directly between ticks
//! or queued with [`FleetManager::enqueue`] and applied at the start of the
//! next tick, before any robot moves.
//!
//! Events are appended to an in-memory journal with gap-free sequence
//! numbers and, when a bus is attached, fanned out to live subscribers.

use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::traffic_manager::TrafficManager;
use crate::domain::events::{EventEnvelope, FleetEvent};
use crate::domain::fleet_config::{FleetConfigSpec, RobotConfig};
use crate::domain::nav_graph::{NavGraph, VertexId};
use crate::domain::path_planner::{PathPlanner, PlanError};
use crate::domain::robot::{Robot, RobotId, RobotState, TransitionError};
use crate::domain::snapshot::{FleetSnapshot, RobotSnapshot};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    #[error("Unknown robot {0}")]
    UnknownRobot(RobotId),

    #[error("Unknown vertex {0}")]
    UnknownVertex(VertexId),

    #[error("No path for {robot} from {from} to {to}")]
    NoPath {
        robot: RobotId,
        from: VertexId,
        to: VertexId,
    },

    #[error("Vertex {vertex} is occupied by {holder}")]
    VertexOccupied { vertex: VertexId, holder: RobotId },

    #[error("Robot {0} has no task to cancel")]
    NoActiveTask(RobotId),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl FleetError {
    /// Rejected requests leave fleet state exactly as it was.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, FleetError::NoPath { .. } | FleetError::InvalidTransition(_))
    }
}

/// Operator command, applied directly or queued for the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FleetCommand {
    Deploy { vertex: VertexId },
    AssignTask { robot: RobotId, destination: VertexId },
    CancelTask { robot: RobotId },
    RemoveRobot { robot: RobotId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Route accepted; `path` runs from the planning origin to the destination.
    Accepted { path: Vec<VertexId> },
    /// The robot already stands on the destination.
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Deployed(RobotId),
    Task(TaskOutcome),
    Cancelled,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub command: FleetCommand,
    pub result: Result<CommandOutcome, FleetError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Queued commands applied at the start of this tick, in queue order.
    pub commands: Vec<CommandResult>,
}

pub struct FleetManager {
    graph: Arc<NavGraph>,
    robots: BTreeMap<RobotId, Robot>,
    traffic: TrafficManager,
    robot_config: RobotConfig,
    next_robot_id: u64,
    tick: u64,
    journal: Vec<EventEnvelope>,
    queue: VecDeque<FleetCommand>,
    event_bus: Option<Arc<EventBus>>,
}

impl FleetManager {
    pub fn new(graph: Arc<NavGraph>, config: &FleetConfigSpec) -> Self {
        Self {
            graph,
            robots: BTreeMap::new(),
            traffic: TrafficManager::new(config.traffic.clone()),
            robot_config: config.robot.clone(),
            next_robot_id: 1,
            tick: 0,
            journal: Vec::new(),
            queue: VecDeque::new(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn graph(&self) -> &Arc<NavGraph> {
        &self.graph
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn robot(&self, id: RobotId) -> Option<&Robot> {
        self.robots.get(&id)
    }

    pub fn robots(&self) -> impl Iterator<Item = &Robot> {
        self.robots.values()
    }

    pub fn traffic(&self) -> &TrafficManager {
        &self.traffic
    }

    pub fn deploy(&mut self, vertex: VertexId) -> Result<RobotId, FleetError> {
        if !self.graph.contains_vertex(vertex) {
            return Err(FleetError::UnknownVertex(vertex));
        }

        let id = RobotId(self.next_robot_id);
        if let Err(holder) = self
            .traffic
            .claim_deployment(&self.graph, id, vertex, self.tick)
        {
            warn!(%vertex, %holder, "Deployment rejected, vertex occupied");
            return Err(FleetError::VertexOccupied { vertex, holder });
        }

        self.next_robot_id += 1;
        self.robots.insert(
            id,
            Robot::new(id, vertex, self.robot_config.speed, self.tick),
        );
        info!(robot = %id, %vertex, "Robot deployed");

        self.record(FleetEvent::RobotDeployed { robot: id, vertex });
        self.flush_traffic_events();
        Ok(id)
    }

    pub fn assign_task(
        &mut self,
        id: RobotId,
        destination: VertexId,
    ) -> Result<TaskOutcome, FleetError> {
        let robot = self.robots.get_mut(&id).ok_or(FleetError::UnknownRobot(id))?;
        if !self.graph.contains_vertex(destination) {
            return Err(FleetError::UnknownVertex(destination));
        }

        let origin = robot.planning_origin();
        let path = match PathPlanner::plan(&self.graph, origin, destination) {
            Ok(path) => path,
            Err(PlanError::UnknownVertex(vertex)) => return Err(FleetError::UnknownVertex(vertex)),
            Err(PlanError::NoPath { from, to }) => {
                warn!(robot = %id, %from, %to, "No path for task");
                // An errored robot is skipped by the tick, so it must not
                // stay on a lane. Pull it back to the vertex it left.
                if let Some(edge) = robot.abandon_edge() {
                    self.traffic.release_all(id);
                    let vertex = robot.current_vertex();
                    if let Err(holder) = self
                        .traffic
                        .claim_deployment(&self.graph, id, vertex, self.tick)
                    {
                        warn!(
                            robot = %id,
                            %vertex,
                            %holder,
                            "Errored robot stopped on an occupied vertex"
                        );
                    }
                    debug!(robot = %id, %edge, %vertex, "Robot pulled back off its edge");
                }
                robot.fail(format!("no path from {from} to {to}"));
                let change = change_state(robot, RobotState::Error)?;
                self.flush_traffic_events();
                self.record_all(change);
                self.record(FleetEvent::RobotError {
                    robot: id,
                    reason: format!("no path from {from} to {to}"),
                });
                return Err(FleetError::NoPath {
                    robot: id,
                    from,
                    to,
                });
            }
        };

        // In transit the far vertex stays at the head of the remaining path
        let remaining: Vec<VertexId> = if robot.current_edge().is_some() {
            path.clone()
        } else {
            path.iter().skip(1).copied().collect()
        };

        let mut events = vec![FleetEvent::TaskAssigned {
            robot: id,
            destination,
            path: path.clone(),
        }];

        let outcome = if remaining.is_empty() {
            robot.finish_task();
            events.extend(change_state(robot, RobotState::Complete)?);
            events.push(FleetEvent::TaskCompleted {
                robot: id,
                vertex: destination,
            });
            TaskOutcome::Completed
        } else {
            robot.assign_route(destination, remaining);
            events.extend(change_state(robot, RobotState::Moving)?);
            TaskOutcome::Accepted { path }
        };

        info!(robot = %id, %destination, "Task assigned");
        self.record_all(events);
        Ok(outcome)
    }

    /// Drop the robot's task. A robot in transit finishes its current edge
    /// and comes to rest at the far vertex.
    pub fn cancel_task(&mut self, id: RobotId) -> Result<(), FleetError> {
        let robot = self.robots.get_mut(&id).ok_or(FleetError::UnknownRobot(id))?;
        let state = robot.state();
        if state == RobotState::Idle {
            return Err(FleetError::NoActiveTask(id));
        }

        robot.cancel();
        let target = match (robot.current_edge().is_some(), state) {
            (false, _) => RobotState::Idle,
            (true, RobotState::Blocked) => RobotState::Waiting,
            (true, RobotState::Error) => RobotState::Moving,
            (true, current) => current,
        };

        let mut events = vec![FleetEvent::TaskCancelled {
            robot: id,
            vertex: robot.planning_origin(),
        }];
        events.extend(change_state(robot, target)?);

        info!(robot = %id, "Task cancelled");
        self.record_all(events);
        Ok(())
    }

    /// Remove a robot and release everything it holds.
    pub fn remove_robot(&mut self, id: RobotId) -> Result<(), FleetError> {
        let robot = self.robots.remove(&id).ok_or(FleetError::UnknownRobot(id))?;
        let freed = self.traffic.release_all(id);
        info!(robot = %id, released = freed.len(), "Robot removed");

        self.record(FleetEvent::RobotRemoved {
            robot: id,
            vertex: robot.current_vertex(),
        });
        self.flush_traffic_events();
        Ok(())
    }

    /// Queue a command for the start of the next tick.
    pub fn enqueue(&mut self, command: FleetCommand) {
        self.queue.push_back(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn apply(&mut self, command: FleetCommand) -> Result<CommandOutcome, FleetError> {
        match command {
            FleetCommand::Deploy { vertex } => self.deploy(vertex).map(CommandOutcome::Deployed),
            FleetCommand::AssignTask { robot, destination } => {
                self.assign_task(robot, destination).map(CommandOutcome::Task)
            }
            FleetCommand::CancelTask { robot } => {
                self.cancel_task(robot).map(|_| CommandOutcome::Cancelled)
            }
            FleetCommand::RemoveRobot { robot } => {
                self.remove_robot(robot).map(|_| CommandOutcome::Removed)
            }
        }
    }

    /// Advance the simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f64) -> TickReport {
        self.tick += 1;

        let mut commands = Vec::with_capacity(self.queue.len());
        while let Some(command) = self.queue.pop_front() {
            let result = self.apply(command.clone());
            if let Err(e) = &result {
                debug!(tick = self.tick, error = %e, "Queued command rejected");
            }
            commands.push(CommandResult { command, result });
        }

        let order = self.traffic.processing_order(self.robots.values());
        for id in order {
            let Some(robot) = self.robots.get_mut(&id) else {
                continue;
            };

            let outcome = self.traffic.advance(&self.graph, robot, dt, self.tick);
            let mut failure = Vec::new();
            if let Err(e) = &outcome {
                warn!(robot = %id, error = %e, "Traffic anomaly, robot halted");
                robot.abandon_edge();
                robot.fail(e.to_string());
                if let Ok(from) = robot.transition(RobotState::Error) {
                    if from != RobotState::Error {
                        failure.push(FleetEvent::StateChanged {
                            robot: id,
                            from,
                            to: RobotState::Error,
                        });
                    }
                }
                failure.push(FleetEvent::RobotError {
                    robot: id,
                    reason: e.to_string(),
                });
            }

            self.flush_traffic_events();
            if outcome.is_err() {
                self.record_all(failure);
                self.traffic.release_all(id);
                self.flush_traffic_events();
            }
        }

        gauge!("waypoint_active_reservations").set(self.traffic.reservation_count() as f64);
        gauge!("waypoint_robots").set(self.robots.len() as f64);

        TickReport {
            tick: self.tick,
            commands,
        }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        let robots = self
            .robots
            .values()
            .map(|robot| RobotSnapshot::capture(robot, &self.graph))
            .collect();
        let reservations = self.traffic.reservations().copied().collect();
        FleetSnapshot::new(self.tick, robots, reservations)
    }

    pub fn events(&self) -> &[EventEnvelope] {
        &self.journal
    }

    /// Journal entries with `sequence >= from`.
    pub fn events_since(&self, from: u64) -> &[EventEnvelope] {
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(self.journal.len());
        &self.journal[start..]
    }

    fn flush_traffic_events(&mut self) {
        let events = self.traffic.drain_events();
        self.record_all(events);
    }

    fn record_all(&mut self, events: impl IntoIterator<Item = FleetEvent>) {
        for event in events {
            self.record(event);
        }
    }

    fn record(&mut self, event: FleetEvent) {
        let envelope = EventEnvelope {
            sequence: self.journal.len() as u64,
            tick: self.tick,
            event,
        };
        if let Some(bus) = &self.event_bus {
            bus.publish(envelope.clone());
        }
        self.journal.push(envelope);
    }
}

/// Apply a transition, returning the `StateChanged` event it produced.
fn change_state(robot: &mut Robot, to: RobotState) -> Result<Option<FleetEvent>, TransitionError> {
    if robot.state() == to {
        return Ok(None);
    }
    let from = robot.transition(to)?;
    Ok(Some(FleetEvent::StateChanged {
        robot: robot.id,
        from,
        to,
    }))
}
