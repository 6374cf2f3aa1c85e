// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `waypoint simulate` - run a fleet over a navigation graph
//!
//! Scenario steps are applied between ticks. By default the clock is stepped
//! as fast as possible; `--realtime` lets the runtime tick on its own timer.

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use waypoint_core::application::fleet_manager::{CommandOutcome, FleetCommand, FleetManager, TaskOutcome};
use waypoint_core::application::simulation::{FleetHandle, FleetRuntime, RuntimeError};
use waypoint_core::domain::fleet_config::FleetConfigManifest;
use waypoint_core::domain::robot::RobotState;
use waypoint_core::domain::snapshot::{FleetSnapshot, RobotSnapshot};
use waypoint_core::infrastructure::event_bus::EventBus;

use crate::commands::graph::GraphSource;
use crate::event_log::{EventLogWriter, DEFAULT_EVENT_LOG};
use crate::scenario::{Scenario, ScenarioStep};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub source: GraphSource,

    /// Scenario YAML with scripted fleet commands
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Ticks to run (overrides the scenario; every step must still fit)
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Tick on the wall clock at the configured interval
    #[arg(long)]
    pub realtime: bool,

    /// Print a status line every N ticks (0 disables)
    #[arg(long, default_value_t = 60)]
    pub report_every: u64,

    /// Event log file
    #[arg(long, default_value = DEFAULT_EVENT_LOG)]
    pub event_log: PathBuf,

    /// Do not write an event log
    #[arg(long)]
    pub no_event_log: bool,

    /// Include reservation changes in the event log
    #[arg(long)]
    pub log_reservations: bool,

    /// Write the final snapshot as JSON ("-" for stdout)
    #[arg(long, value_name = "FILE")]
    pub snapshot_json: Option<PathBuf>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

pub async fn run(args: SimulateArgs, config_override: Option<PathBuf>) -> Result<()> {
    let mut config = FleetConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let graph = Arc::new(args.source.load()?);
    let scenario = match &args.scenario {
        Some(path) => Scenario::from_yaml_file(path)?,
        None => Scenario::default(),
    }
    .with_ticks(args.ticks);
    scenario.validate(&graph).context("Invalid scenario")?;

    if let Some(dt) = scenario.delta_seconds {
        config.spec.simulation.delta_seconds = dt;
    }
    config.spec.simulation.auto_tick = args.realtime;
    let ticks = scenario.ticks;

    let metrics = if args.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install metrics recorder")?,
        )
    } else {
        None
    };

    let bus = Arc::new(EventBus::new(config.spec.events.bus_capacity));
    let log_task = if args.no_event_log {
        None
    } else {
        Some(
            EventLogWriter::new(&args.event_log)
                .with_reservations(args.log_reservations)
                .spawn(bus.subscribe()),
        )
    };

    let fleet = FleetManager::new(graph.clone(), &config.spec).with_event_bus(bus);
    let (runtime, handle) = FleetRuntime::new(fleet, config.spec.simulation.clone());
    let runtime_task = runtime.start();

    info!(
        vertices = graph.vertex_count(),
        edges = graph.edge_count(),
        ticks,
        steps = scenario.steps.len(),
        realtime = args.realtime,
        "Starting simulation"
    );
    println!(
        "{} {} vertices, {} edges, {} ticks of {:.4}s",
        "Simulating".bold(),
        graph.vertex_count(),
        graph.edge_count(),
        ticks,
        config.spec.simulation.delta_seconds
    );

    let driven = if args.realtime {
        drive_realtime(
            &handle,
            &scenario,
            ticks,
            config.spec.simulation.tick_interval_ms,
            args.report_every,
        )
        .await
    } else {
        drive_stepped(&handle, &scenario, ticks, args.report_every).await
    };
    let snapshot = handle.snapshot().await;

    handle.shutdown();
    let fleet = runtime_task.await.context("Fleet runtime task failed")?;
    driven?;
    let snapshot = snapshot?;
    let journal_len = fleet.events().len();
    // Dropping the fleet closes the bus and lets the event log finish
    drop(fleet);

    println!();
    print_summary(&snapshot);
    println!("  Events: {}", journal_len);

    if let Some(task) = log_task {
        let written = task.await.context("Event log task failed")??;
        println!(
            "  Event log: {} ({} lines)",
            args.event_log.display(),
            written
        );
    }

    if let Some(path) = &args.snapshot_json {
        write_snapshot(&snapshot, path)?;
    }

    if let Some(metrics) = metrics {
        println!();
        println!("{}", "Metrics:".bold());
        print!("{}", metrics.render());
    }

    Ok(())
}

async fn drive_stepped(
    handle: &FleetHandle,
    scenario: &Scenario,
    ticks: u64,
    report_every: u64,
) -> Result<()> {
    let mut cursor = 0;
    for tick in 0..ticks {
        for step in scenario.due(tick, &mut cursor) {
            apply_step(handle, step, tick).await?;
        }
        handle.step(1).await?;

        if report_every > 0 && (tick + 1) % report_every == 0 {
            print_status(&handle.snapshot().await?);
        }
    }
    for step in scenario.due(ticks, &mut cursor) {
        apply_step(handle, step, ticks).await?;
    }
    Ok(())
}

async fn drive_realtime(
    handle: &FleetHandle,
    scenario: &Scenario,
    ticks: u64,
    tick_interval_ms: u64,
    report_every: u64,
) -> Result<()> {
    let mut poll = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
    let mut cursor = 0;
    let mut last_report = 0;

    loop {
        tokio::select! {
            _ = poll.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping simulation");
                return Ok(());
            }
        }

        let snapshot = handle.snapshot().await?;
        for step in scenario.due(snapshot.tick, &mut cursor) {
            apply_step(handle, step, snapshot.tick).await?;
        }
        if report_every > 0 && snapshot.tick >= last_report + report_every {
            print_status(&snapshot);
            last_report = snapshot.tick;
        }
        if snapshot.tick >= ticks {
            return Ok(());
        }
    }
}

/// Rejected commands are reported and the run continues.
async fn apply_step(handle: &FleetHandle, step: &ScenarioStep, tick: u64) -> Result<()> {
    match handle.execute(step.command.clone()).await {
        Ok(outcome) => {
            println!(
                "  {} tick {:>6}  {}",
                "→".cyan(),
                tick,
                describe(&step.command, &outcome)
            );
            Ok(())
        }
        Err(RuntimeError::Fleet(e)) => {
            warn!(tick, command = ?step.command, error = %e, "Scenario command rejected");
            println!(
                "  {} tick {:>6}  {}",
                "✗".red(),
                tick,
                format!("{:?} rejected: {}", step.command, e).red()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn describe(command: &FleetCommand, outcome: &CommandOutcome) -> String {
    match (command, outcome) {
        (FleetCommand::Deploy { vertex }, CommandOutcome::Deployed(robot)) => {
            format!("{} deployed at {}", robot, vertex)
        }
        (
            FleetCommand::AssignTask { robot, destination },
            CommandOutcome::Task(TaskOutcome::Accepted { path }),
        ) => format!(
            "{} heading to {} ({} hops)",
            robot,
            destination,
            path.len().saturating_sub(1)
        ),
        (
            FleetCommand::AssignTask { robot, destination },
            CommandOutcome::Task(TaskOutcome::Completed),
        ) => format!("{} already at {}", robot, destination),
        (FleetCommand::CancelTask { robot }, CommandOutcome::Cancelled) => {
            format!("{} task cancelled", robot)
        }
        (FleetCommand::RemoveRobot { robot }, CommandOutcome::Removed) => {
            format!("{} removed", robot)
        }
        (command, outcome) => format!("{:?} -> {:?}", command, outcome),
    }
}

fn state_label(state: RobotState) -> ColoredString {
    let label = state.to_string();
    match state {
        RobotState::Idle => label.normal(),
        RobotState::Moving => label.cyan(),
        RobotState::Waiting => label.yellow(),
        RobotState::Blocked => label.red().bold(),
        RobotState::Complete => label.green(),
        RobotState::Error => label.red(),
    }
}

fn print_status(snapshot: &FleetSnapshot) {
    let counts: Vec<String> = snapshot
        .status_counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(state, count)| format!("{} {}", state_label(*state), count))
        .collect();
    println!(
        "  {} tick {:>6}  {}  reservations {}",
        "·".dimmed(),
        snapshot.tick,
        if counts.is_empty() {
            "no robots".dimmed().to_string()
        } else {
            counts.join("  ")
        },
        snapshot.reservations.len()
    );
}

fn robot_location(robot: &RobotSnapshot) -> String {
    match (robot.edge, robot.path.first()) {
        (Some(edge), Some(next)) => format!(
            "{} {} -> {} {:>3.0}%",
            edge.to_string(),
            robot.vertex,
            next,
            robot.progress * 100.0
        ),
        (Some(edge), None) => format!("{} {:>3.0}%", edge.to_string(), robot.progress * 100.0),
        (None, _) => robot.vertex.to_string(),
    }
}

fn print_summary(snapshot: &FleetSnapshot) {
    println!("{} tick {}", "Final state:".bold(), snapshot.tick);
    for robot in &snapshot.robots {
        let destination = robot
            .destination
            .map(|vertex| vertex.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "  {:<5} {:<10} at {:<24} dest {:<5}",
            robot.id.to_string(),
            state_label(robot.state),
            robot_location(robot),
            destination
        );
        if robot.stall_ticks > 0 {
            line.push_str(&format!("  stalled {}", robot.stall_ticks));
        }
        println!("{}", line);
        if let Some(error) = &robot.last_error {
            println!("        {}", error.red());
        }
    }

    let counts: Vec<String> = snapshot
        .status_counts
        .iter()
        .map(|(state, count)| format!("{}={}", state, count))
        .collect();
    println!("  Status: {}", counts.join(" "));
    println!("  Reservations held: {}", snapshot.reservations.len());
}

fn write_snapshot(snapshot: &FleetSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    if path == Path::new("-") {
        println!("{}", json);
    } else {
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))?;
        println!(
            "{}",
            format!("✓ Snapshot written: {}", path.display()).green()
        );
    }
    Ok(())
}
