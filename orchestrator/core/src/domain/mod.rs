// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Topology, motion and occupancy model of the fleet. Nothing in this layer
//! spawns tasks; the only I/O is reading configuration manifests.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Graph, robot state machine, reservations, events, configuration

pub mod nav_graph;
pub mod path_planner;
pub mod robot;
pub mod reservation;
pub mod events;
pub mod snapshot;
pub mod fleet_config;
