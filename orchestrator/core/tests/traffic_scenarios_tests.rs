// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end traffic scenarios driven through the fleet manager.
//!
//! Covers contention for a single lane, head-on deadlock detection, strict
//! vertex exclusion against parked robots, the aging tie-break and operator
//! recovery from a blocked robot.

use std::sync::Arc;
use waypoint_core::application::fleet_manager::{FleetManager, TaskOutcome};
use waypoint_core::domain::events::FleetEvent;
use waypoint_core::domain::fleet_config::{FleetConfigManifest, FleetConfigSpec};
use waypoint_core::domain::nav_graph::{GraphDefinition, NavGraph, VertexId};
use waypoint_core::domain::reservation::Segment;
use waypoint_core::domain::robot::{RobotId, RobotState};

fn line() -> Arc<NavGraph> {
    Arc::new(
        NavGraph::from_definition(
            GraphDefinition::default()
                .vertex(0, (0.0, 0.0))
                .vertex(1, (1.0, 0.0))
                .vertex(2, (2.0, 0.0))
                .lane(0, 0, 1, 1.0)
                .lane(1, 1, 2, 1.0),
        )
        .unwrap(),
    )
}

/// Junction 0 with leaves 1, 2 and 3.
fn star() -> Arc<NavGraph> {
    Arc::new(
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
        .unwrap(),
    )
}

fn spec(yaml_traffic: &str) -> FleetConfigSpec {
    let yaml = format!(
        "apiVersion: waypoint.dev/v1\nkind: FleetConfig\nmetadata:\n  name: test\nspec:\n  robot:\n    speed: 1.0\n  traffic:\n{}",
        yaml_traffic
    );
    let manifest = FleetConfigManifest::from_yaml_str(&yaml).unwrap();
    manifest.validate().unwrap();
    manifest.spec
}

fn run(fleet: &mut FleetManager, ticks: usize, dt: f64) {
    for _ in 0..ticks {
        fleet.tick(dt);
    }
}

fn conflicts_of(fleet: &FleetManager, robot: RobotId) -> usize {
    fleet
        .events()
        .iter()
        .filter(|e| {
            matches!(&e.event, FleetEvent::TrafficConflict { robots, .. } if robots[0] == robot)
        })
        .count()
}

#[test]
fn test_two_robots_share_one_lane_in_turn() {
    // Junction-only exclusion lets both robots start on the same plain vertex
    let mut fleet = FleetManager::new(
        line(),
        &spec("    stall_threshold: 180\n    junction_min_degree: 3\n"),
    );
    let r1 = fleet.deploy(VertexId(0)).unwrap();
    let r2 = fleet.deploy(VertexId(0)).unwrap();
    fleet.assign_task(r1, VertexId(1)).unwrap();
    fleet.assign_task(r2, VertexId(1)).unwrap();

    fleet.tick(0.25);
    assert_eq!(fleet.robot(r1).unwrap().state(), RobotState::Moving);
    assert!(fleet.robot(r1).unwrap().current_edge().is_some());
    assert_eq!(fleet.robot(r2).unwrap().state(), RobotState::Waiting);
    assert!(fleet.robot(r2).unwrap().current_edge().is_none());

    run(&mut fleet, 20, 0.25);
    for robot in [r1, r2] {
        let robot = fleet.robot(robot).unwrap();
        assert_eq!(robot.state(), RobotState::Complete);
        assert_eq!(robot.current_vertex(), VertexId(1));
    }
    assert_eq!(fleet.traffic().reservation_count(), 0);
}

#[test]
fn test_head_on_deadlock_reports_one_conflict_per_robot() {
    let mut fleet = FleetManager::new(line(), &spec("    stall_threshold: 10\n"));
    let a = fleet.deploy(VertexId(0)).unwrap();
    let b = fleet.deploy(VertexId(1)).unwrap();
    fleet.assign_task(a, VertexId(1)).unwrap();
    fleet.assign_task(b, VertexId(0)).unwrap();

    run(&mut fleet, 100, 0.25);

    assert_eq!(fleet.robot(a).unwrap().state(), RobotState::Blocked);
    assert_eq!(fleet.robot(b).unwrap().state(), RobotState::Blocked);
    assert_eq!(conflicts_of(&fleet, a), 1);
    assert_eq!(conflicts_of(&fleet, b), 1);

    // Blocked robots stay put and raise nothing further
    let before = fleet.events().len();
    run(&mut fleet, 50, 0.25);
    assert_eq!(fleet.events().len(), before);
}

#[test]
fn test_robot_never_passes_a_parked_robot() {
    let mut fleet = FleetManager::new(line(), &spec("    stall_threshold: 10\n"));
    let parked = fleet.deploy(VertexId(1)).unwrap();
    let mover = fleet.deploy(VertexId(0)).unwrap();
    fleet.assign_task(mover, VertexId(2)).unwrap();

    for _ in 0..100 {
        fleet.tick(0.25);
        let robot = fleet.robot(mover).unwrap();
        assert_ne!(robot.current_vertex(), VertexId(1));
        assert_ne!(robot.state(), RobotState::Complete);
    }

    let robot = fleet.robot(mover).unwrap();
    assert_eq!(robot.state(), RobotState::Blocked);
    assert_eq!(robot.current_vertex(), VertexId(0));
    assert_eq!(robot.progress(), 1.0);
    assert_eq!(
        fleet.traffic().holder(Segment::Vertex(VertexId(1))),
        Some(parked)
    );
    assert_eq!(fleet.robot(parked).unwrap().state(), RobotState::Idle);
    assert!(fleet.events().iter().any(|e| e.event
        == FleetEvent::TrafficConflict {
            robots: vec![mover, parked],
            segment: Segment::Vertex(VertexId(1)),
        }));
}

#[test]
fn test_junction_only_exclusion_passes_parked_robot() {
    let mut fleet = FleetManager::new(
        line(),
        &spec("    stall_threshold: 10\n    junction_min_degree: 3\n"),
    );
    let parked = fleet.deploy(VertexId(1)).unwrap();
    let mover = fleet.deploy(VertexId(0)).unwrap();
    fleet.assign_task(mover, VertexId(2)).unwrap();

    run(&mut fleet, 20, 0.25);
    let robot = fleet.robot(mover).unwrap();
    assert_eq!(robot.state(), RobotState::Complete);
    assert_eq!(robot.current_vertex(), VertexId(2));
    assert_eq!(fleet.robot(parked).unwrap().current_vertex(), VertexId(1));
    assert_eq!(fleet.traffic().reservation_count(), 0);
}

#[test]
fn test_lowest_id_wins_simultaneous_request() {
    let mut fleet = FleetManager::new(
        line(),
        &spec("    tie_break: lowest-id\n    junction_min_degree: 3\n"),
    );
    let r1 = fleet.deploy(VertexId(0)).unwrap();
    let r2 = fleet.deploy(VertexId(0)).unwrap();
    let r3 = fleet.deploy(VertexId(0)).unwrap();
    fleet.assign_task(r1, VertexId(1)).unwrap();
    fleet.assign_task(r3, VertexId(1)).unwrap();
    fleet.tick(0.25);
    fleet.assign_task(r2, VertexId(1)).unwrap();

    run(&mut fleet, 5, 0.25);
    assert!(fleet.robot(r2).unwrap().current_edge().is_some());
    assert!(fleet.robot(r3).unwrap().current_edge().is_none());
}

#[test]
fn test_aging_lets_longest_waiting_robot_through() {
    let mut fleet = FleetManager::new(
        line(),
        &spec("    tie_break: aging\n    junction_min_degree: 3\n"),
    );
    let r1 = fleet.deploy(VertexId(0)).unwrap();
    let r2 = fleet.deploy(VertexId(0)).unwrap();
    let r3 = fleet.deploy(VertexId(0)).unwrap();
    fleet.assign_task(r1, VertexId(1)).unwrap();
    fleet.assign_task(r3, VertexId(1)).unwrap();
    fleet.tick(0.25);
    fleet.assign_task(r2, VertexId(1)).unwrap();

    run(&mut fleet, 5, 0.25);
    assert!(fleet.robot(r3).unwrap().current_edge().is_some());
    assert!(fleet.robot(r2).unwrap().current_edge().is_none());
    assert_eq!(fleet.robot(r2).unwrap().state(), RobotState::Waiting);
}

#[test]
fn test_blocked_robot_recovers_after_holder_removed() {
    let mut fleet = FleetManager::new(star(), &spec("    stall_threshold: 2\n"));
    let parked = fleet.deploy(VertexId(0)).unwrap();
    let traveller = fleet.deploy(VertexId(1)).unwrap();
    fleet.assign_task(traveller, VertexId(2)).unwrap();

    run(&mut fleet, 10, 0.5);
    let robot = fleet.robot(traveller).unwrap();
    assert_eq!(robot.state(), RobotState::Blocked);
    assert_eq!(robot.progress(), 1.0);
    assert_eq!(
        fleet.traffic().holder(Segment::Vertex(VertexId(0))),
        Some(parked)
    );

    // Blocked robots are not retried until an operator intervenes
    fleet.remove_robot(parked).unwrap();
    run(&mut fleet, 3, 0.5);
    assert_eq!(fleet.robot(traveller).unwrap().state(), RobotState::Blocked);

    match fleet.assign_task(traveller, VertexId(2)).unwrap() {
        TaskOutcome::Accepted { path } => assert_eq!(path, vec![VertexId(0), VertexId(2)]),
        other => panic!("unexpected outcome {other:?}"),
    }
    run(&mut fleet, 10, 0.5);
    let robot = fleet.robot(traveller).unwrap();
    assert_eq!(robot.state(), RobotState::Complete);
    assert_eq!(robot.current_vertex(), VertexId(2));
}

#[test]
fn test_cancel_blocked_robot_finishes_edge_once_clear() {
    let mut fleet = FleetManager::new(star(), &spec("    stall_threshold: 2\n"));
    let parked = fleet.deploy(VertexId(0)).unwrap();
    let traveller = fleet.deploy(VertexId(1)).unwrap();
    fleet.assign_task(traveller, VertexId(3)).unwrap();
    run(&mut fleet, 10, 0.5);
    assert_eq!(fleet.robot(traveller).unwrap().state(), RobotState::Blocked);

    fleet.cancel_task(traveller).unwrap();
    assert_eq!(fleet.robot(traveller).unwrap().state(), RobotState::Waiting);
    assert!(fleet
        .events()
        .iter()
        .any(|e| e.event == FleetEvent::TaskCancelled { robot: traveller, vertex: VertexId(0) }));

    fleet.remove_robot(parked).unwrap();
    run(&mut fleet, 2, 0.5);

    let robot = fleet.robot(traveller).unwrap();
    assert_eq!(robot.state(), RobotState::Idle);
    assert_eq!(robot.current_vertex(), VertexId(0));
    assert_eq!(
        fleet.traffic().holder(Segment::Vertex(VertexId(0))),
        Some(traveller)
    );
}
