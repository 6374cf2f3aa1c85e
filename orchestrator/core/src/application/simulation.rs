// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Runtime - Background task driving the fleet clock
//!
//! One tokio task owns the [`FleetManager`]. Ticks fire from an interval
//! timer (or only on explicit [`FleetHandle::step`] calls when automatic
//! ticking is off) and operator requests arrive over an mpsc channel, so a
//! request always runs between two ticks, never inside one.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Serialise ticks and commands onto a single owner

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::fleet_manager::{
    CommandOutcome, FleetCommand, FleetError, FleetManager, TaskOutcome, TickReport,
};
use crate::domain::events::EventEnvelope;
use crate::domain::fleet_config::SimulationConfig;
use crate::domain::nav_graph::VertexId;
use crate::domain::robot::RobotId;
use crate::domain::snapshot::FleetSnapshot;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Fleet runtime has stopped")]
    Stopped,

    #[error(transparent)]
    Fleet(#[from] FleetError),
}

type FleetOp = Box<dyn FnOnce(&mut FleetManager) + Send>;

pub enum RuntimeRequest {
    /// Run an operation against the fleet between ticks.
    Apply(FleetOp),
    /// Queue a command for the next tick without waiting for its result.
    Enqueue(FleetCommand),
}

pub struct FleetRuntime {
    fleet: FleetManager,
    requests: mpsc::Receiver<RuntimeRequest>,
    config: SimulationConfig,
    shutdown_token: CancellationToken,
}

impl FleetRuntime {
    pub fn new(fleet: FleetManager, config: SimulationConfig) -> (Self, FleetHandle) {
        let (sender, requests) = mpsc::channel(64);
        let shutdown_token = CancellationToken::new();
        let handle = FleetHandle {
            sender,
            shutdown_token: shutdown_token.clone(),
            delta_seconds: config.delta_seconds,
        };
        (
            Self {
                fleet,
                requests,
                config,
                shutdown_token,
            },
            handle,
        )
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the runtime. The join handle yields the fleet back on shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<FleetManager> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> FleetManager {
        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            delta_seconds = self.config.delta_seconds,
            auto_tick = self.config.auto_tick,
            "Starting fleet runtime"
        );

        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping fleet runtime");
                    break;
                }
                request = self.requests.recv() => match request {
                    Some(RuntimeRequest::Apply(op)) => op(&mut self.fleet),
                    Some(RuntimeRequest::Enqueue(command)) => self.fleet.enqueue(command),
                    None => {
                        debug!("All fleet handles dropped");
                        break;
                    }
                },
                _ = ticker.tick(), if self.config.auto_tick => {
                    let report = self.fleet.tick(self.config.delta_seconds);
                    log_rejections(&report);
                }
            }
        }

        info!(tick = self.fleet.current_tick(), "Fleet runtime stopped");
        self.fleet
    }
}

fn log_rejections(report: &TickReport) {
    for applied in &report.commands {
        if let Err(e) = &applied.result {
            warn!(tick = report.tick, command = ?applied.command, error = %e, "Queued command failed");
        }
    }
}

/// Cloneable client of a running [`FleetRuntime`].
#[derive(Clone)]
pub struct FleetHandle {
    sender: mpsc::Sender<RuntimeRequest>,
    shutdown_token: CancellationToken,
    delta_seconds: f64,
}

impl FleetHandle {
    /// Run `op` on the fleet task and wait for its result.
    pub async fn with_fleet<T, F>(&self, op: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FleetManager) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let request = RuntimeRequest::Apply(Box::new(move |fleet| {
            let _ = tx.send(op(fleet));
        }));
        self.sender
            .send(request)
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    pub async fn execute(&self, command: FleetCommand) -> Result<CommandOutcome, RuntimeError> {
        Ok(self.with_fleet(move |fleet| fleet.apply(command)).await??)
    }

    pub async fn enqueue(&self, command: FleetCommand) -> Result<(), RuntimeError> {
        self.sender
            .send(RuntimeRequest::Enqueue(command))
            .await
            .map_err(|_| RuntimeError::Stopped)
    }

    pub async fn deploy(&self, vertex: VertexId) -> Result<RobotId, RuntimeError> {
        Ok(self.with_fleet(move |fleet| fleet.deploy(vertex)).await??)
    }

    pub async fn assign_task(
        &self,
        robot: RobotId,
        destination: VertexId,
    ) -> Result<TaskOutcome, RuntimeError> {
        Ok(self
            .with_fleet(move |fleet| fleet.assign_task(robot, destination))
            .await??)
    }

    pub async fn cancel_task(&self, robot: RobotId) -> Result<(), RuntimeError> {
        Ok(self.with_fleet(move |fleet| fleet.cancel_task(robot)).await??)
    }

    pub async fn remove_robot(&self, robot: RobotId) -> Result<(), RuntimeError> {
        Ok(self.with_fleet(move |fleet| fleet.remove_robot(robot)).await??)
    }

    pub async fn snapshot(&self) -> Result<FleetSnapshot, RuntimeError> {
        self.with_fleet(|fleet| fleet.snapshot()).await
    }

    pub async fn events_since(&self, sequence: u64) -> Result<Vec<EventEnvelope>, RuntimeError> {
        self.with_fleet(move |fleet| fleet.events_since(sequence).to_vec())
            .await
    }

    /// Advance `ticks` ticks immediately, regardless of the timer.
    pub async fn step(&self, ticks: u64) -> Result<Vec<TickReport>, RuntimeError> {
        let dt = self.delta_seconds;
        self.with_fleet(move |fleet| (0..ticks).map(|_| fleet.tick(dt)).collect())
            .await
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}
