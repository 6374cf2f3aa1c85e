// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Waypoint Core
//!
//! Traffic-aware coordination of robots moving over a shared navigation
//! graph: path planning, segment reservations, the robot state machine and
//! the fleet tick loop.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, fleet use cases, event and topology adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
