// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod graph_loader;

pub use event_bus::{EventBus, EventBusError, EventReceiver, RobotEventReceiver};
pub use graph_loader::{EdgeWeighting, GraphLoader};
