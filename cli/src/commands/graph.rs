// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Navigation graph commands
//!
//! Commands: show, validate, path

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use waypoint_core::domain::fleet_config::FleetConfigManifest;
use waypoint_core::domain::nav_graph::{NavGraph, VertexId};
use waypoint_core::infrastructure::graph_loader::{EdgeWeighting, GraphLoader};

/// Where and how to read a navigation graph.
#[derive(Args, Debug, Clone)]
pub struct GraphSource {
    /// Navigation graph JSON (floor plan or graph definition)
    #[arg(value_name = "GRAPH")]
    pub graph: PathBuf,

    /// Floor-plan level to load (default: l1, else the first level)
    #[arg(long)]
    pub level: Option<String>,

    /// Weigh every lane as 1 instead of its length
    #[arg(long)]
    pub uniform: bool,
}

impl GraphSource {
    pub fn load(&self) -> Result<NavGraph> {
        let mut loader = GraphLoader::new();
        if let Some(level) = &self.level {
            loader = loader.with_level(level.clone());
        }
        if self.uniform {
            loader = loader.with_weighting(EdgeWeighting::Uniform);
        }
        loader
            .load_file(&self.graph)
            .with_context(|| format!("Failed to load navigation graph {:?}", self.graph))
    }
}

#[derive(Subcommand)]
pub enum GraphCommand {
    /// List vertices and edges
    Show {
        #[command(flatten)]
        source: GraphSource,
    },

    /// Check that a graph file loads into a valid topology
    Validate {
        #[command(flatten)]
        source: GraphSource,
    },

    /// Plan the shortest path between two vertices
    Path {
        #[command(flatten)]
        source: GraphSource,

        /// Start vertex id
        from: u64,

        /// Goal vertex id
        to: u64,
    },
}

pub async fn handle_command(command: GraphCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        GraphCommand::Show { source } => show(source, config_override).await,
        GraphCommand::Validate { source } => validate(source).await,
        GraphCommand::Path { source, from, to } => path(source, from, to).await,
    }
}

async fn show(source: GraphSource, config_override: Option<PathBuf>) -> Result<()> {
    let config = FleetConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let graph = source.load()?;
    let min_degree = config.spec.traffic.junction_min_degree;

    println!(
        "{} {} vertices, {} edges",
        "Graph:".bold(),
        graph.vertex_count(),
        graph.edge_count()
    );
    println!();

    println!("{}", "Vertices:".bold());
    for vertex in graph.vertices() {
        let degree = vertex.adjacent.len();
        let position = vertex
            .position
            .map(|(x, y)| format!("({:.2}, {:.2})", x, y))
            .unwrap_or_else(|| "(no position)".to_string());
        let mut line = format!("  {:<6} {:<18} degree {}", vertex.id.to_string(), position, degree);
        if let Some(name) = &vertex.name {
            line.push_str(&format!("  {}", name));
        }
        // With the default of 0 every vertex is exclusive; only tag real junctions
        if min_degree > 0 && graph.is_junction(vertex.id, min_degree) {
            println!("{}  {}", line, "junction".yellow());
        } else {
            println!("{}", line);
        }
    }
    println!();

    println!("{}", "Edges:".bold());
    for edge in graph.edges() {
        let reverse = edge
            .reverse
            .map(|id| format!("twin {}", id))
            .unwrap_or_else(|| "one-way".dimmed().to_string());
        println!(
            "  {:<6} {} -> {}  weight {:.3}  {}",
            edge.id.to_string(),
            edge.from,
            edge.to,
            edge.weight,
            reverse
        );
    }

    Ok(())
}

async fn validate(source: GraphSource) -> Result<()> {
    println!("Validating navigation graph...");

    let graph = source.load()?;

    println!(
        "{}",
        format!(
            "✓ Graph is valid: {} vertices, {} edges",
            graph.vertex_count(),
            graph.edge_count()
        )
        .green()
    );

    let isolated: Vec<String> = graph
        .vertices()
        .filter(|vertex| vertex.adjacent.is_empty())
        .map(|vertex| vertex.id.to_string())
        .collect();
    if !isolated.is_empty() {
        println!(
            "{}",
            format!("⚠ Isolated vertices: {}", isolated.join(", ")).yellow()
        );
    }

    Ok(())
}

async fn path(source: GraphSource, from: u64, to: u64) -> Result<()> {
    let graph = source.load()?;
    let path = graph
        .shortest_path(VertexId(from), VertexId(to))
        .context("Path planning failed")?;
    let weight = graph.path_weight(&path)?;

    let hops: Vec<String> = path.iter().map(ToString::to_string).collect();
    println!("{}", hops.join(" → ").bold());
    println!("  Hops: {}", path.len().saturating_sub(1));
    println!("  Weight: {:.3}", weight);

    Ok(())
}
