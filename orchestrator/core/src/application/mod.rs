// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod traffic_manager;
pub mod fleet_manager;
pub mod simulation;

// Re-export use cases for convenience
pub use fleet_manager::{CommandOutcome, CommandResult, FleetCommand, FleetError, FleetManager, TaskOutcome, TickReport};
pub use simulation::{FleetHandle, FleetRuntime, RuntimeError};
pub use traffic_manager::{Grant, TrafficError, TrafficManager};
