// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Waypoint Fleet CLI
//!
//! The `waypoint` binary runs traffic-aware fleet simulations over a
//! navigation graph and inspects graphs and configuration.
//!
//! ## Commands
//!
//! - `waypoint simulate <GRAPH> [--scenario FILE]` - Run a fleet simulation
//! - `waypoint graph show|validate|path` - Navigation graph inspection
//! - `waypoint config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use waypoint_cli::commands::{self, ConfigCommand, GraphCommand, SimulateArgs};

/// Waypoint - traffic-aware robot fleet coordination
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "WAYPOINT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WAYPOINT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a fleet simulation over a navigation graph
    #[command(name = "simulate")]
    Simulate(SimulateArgs),

    /// Navigation graph inspection
    #[command(name = "graph")]
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Simulate(args)) => commands::simulate::run(args, cli.config).await,
        Some(Commands::Graph { command }) => {
            commands::graph::handle_command(command, cli.config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
