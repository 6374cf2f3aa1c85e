// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scripted operator input for `waypoint simulate`.
//!
//! A scenario is a YAML document listing fleet commands keyed by the tick at
//! which they are issued:
//!
//! ```yaml
//! ticks: 600
//! steps:
//!   - at_tick: 0
//!     command: { action: deploy, vertex: 0 }
//!   - at_tick: 0
//!     command: { action: assign_task, robot: 1, destination: 8 }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use waypoint_core::application::fleet_manager::FleetCommand;
use waypoint_core::domain::nav_graph::NavGraph;

fn default_ticks() -> u64 {
    600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Total ticks to simulate.
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Overrides `spec.simulation.delta_seconds` for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_seconds: Option<f64>,

    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub at_tick: u64,
    pub command: FleetCommand,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            delta_seconds: None,
            steps: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut scenario: Scenario =
            serde_yaml::from_str(yaml).context("Failed to parse scenario YAML")?;
        // Stable, so steps sharing a tick keep their written order
        scenario.steps.sort_by_key(|step| step.at_tick);
        Ok(scenario)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {:?}", path))?;
        Self::from_yaml_str(&content)
    }

    /// Replace the run length, e.g. from `--ticks`. Steps are validated
    /// against whatever length the run ends up with.
    pub fn with_ticks(mut self, ticks: Option<u64>) -> Self {
        if let Some(ticks) = ticks {
            self.ticks = ticks;
        }
        self
    }

    /// Reject scenarios that could never run as written against `graph`.
    pub fn validate(&self, graph: &NavGraph) -> Result<()> {
        if let Some(dt) = self.delta_seconds {
            if !dt.is_finite() || dt <= 0.0 {
                bail!("delta_seconds must be a positive number, got {}", dt);
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.at_tick > self.ticks {
                bail!(
                    "step {} is scheduled at tick {} but the scenario ends at tick {}",
                    index,
                    step.at_tick,
                    self.ticks
                );
            }
            let vertex = match step.command {
                FleetCommand::Deploy { vertex } => Some(vertex),
                FleetCommand::AssignTask { destination, .. } => Some(destination),
                FleetCommand::CancelTask { .. } | FleetCommand::RemoveRobot { .. } => None,
            };
            if let Some(vertex) = vertex {
                if !graph.contains_vertex(vertex) {
                    bail!("step {} references unknown vertex {}", index, vertex);
                }
            }
        }

        Ok(())
    }

    /// Steps scheduled at or before `tick` that have not been consumed yet.
    /// `cursor` tracks consumption across calls.
    pub fn due<'a>(&'a self, tick: u64, cursor: &mut usize) -> &'a [ScenarioStep] {
        let start = (*cursor).min(self.steps.len());
        let end = start
            + self.steps[start..]
                .iter()
                .take_while(|step| step.at_tick <= tick)
                .count();
        *cursor = end;
        &self.steps[start..end]
    }
}
