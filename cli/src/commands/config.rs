// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use waypoint_core::domain::fleet_config::FleetConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./waypoint-config.yaml)
        #[arg(short, long, default_value = "./waypoint-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = FleetConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. WAYPOINT_CONFIG_PATH: {}",
            std::env::var("WAYPOINT_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./waypoint-config.yaml");
        println!("  4. ~/.waypoint/config.yaml");
        println!("  5. /etc/waypoint/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Fleet:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    if let Some(labels) = &config.metadata.labels {
        let mut labels: Vec<_> = labels.iter().collect();
        labels.sort();
        for (key, value) in labels {
            println!("  Label: {}={}", key, value);
        }
    }
    println!();

    let traffic = &config.spec.traffic;
    println!("{}", "Traffic:".bold());
    println!("  Stall threshold: {} ticks", traffic.stall_threshold);
    println!("  Tie-break: {}", traffic.tie_break);
    println!("  Junction min degree: {}", traffic.junction_min_degree);
    println!("  Lane exclusive: {}", traffic.lane_exclusive);
    println!();

    println!("{}", "Robots:".bold());
    println!("  Speed: {} units/s", config.spec.robot.speed);
    println!();

    let simulation = &config.spec.simulation;
    println!("{}", "Simulation:".bold());
    println!("  Tick interval: {} ms", simulation.tick_interval_ms);
    println!("  Delta: {:.6} s", simulation.delta_seconds);
    println!("  Auto tick: {}", simulation.auto_tick);
    println!();

    println!("{}", "Events:".bold());
    println!("  Bus capacity: {}", config.spec.events.bus_capacity);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = FleetConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
