// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Navigation Graph JSON Loader
//!
//! Translates topology files into a validated [`NavGraph`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external JSON → Domain objects
//! - **Anti-Corruption:** Translates the floor-plan schema to the graph model
//!
//! # Formats
//!
//! Floor-plan documents carry one or more levels. Vertex ids are positions in
//! the `vertices` array; lanes are undirected.
//!
//! ```json
//! {
//!   "levels": {
//!     "l1": {
//!       "vertices": [[0.0, 0.0, {"name": "dock"}], [4.0, 0.0, {}]],
//!       "lanes": [[0, 1, {}]]
//!     }
//!   }
//! }
//! ```
//!
//! Documents without `levels` are read as a [`GraphDefinition`] directly.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use crate::domain::nav_graph::{EdgeId, EdgeSpec, GraphDefinition, NavGraph, VertexId, VertexSpec};

const DEFAULT_LEVEL: &str = "l1";

/// How lane weights are derived from floor-plan documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EdgeWeighting {
    /// Euclidean distance between the lane endpoints.
    #[default]
    Distance,
    /// Every lane costs 1, so planning minimises hop count.
    Uniform,
}

#[derive(Debug, Deserialize)]
struct FloorPlan {
    levels: BTreeMap<String, FloorLevel>,
}

#[derive(Debug, Deserialize)]
struct FloorLevel {
    #[serde(default)]
    vertices: Vec<Vec<Value>>,
    #[serde(default)]
    lanes: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphLoader {
    weighting: EdgeWeighting,
    level: Option<String>,
}

impl GraphLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weighting(mut self, weighting: EdgeWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Level to read from floor-plan documents; defaults to `l1`, or the
    /// first level when `l1` is absent.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<NavGraph> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read navigation graph file: {:?}", path))?;
        let graph = self
            .parse_str(&json)
            .with_context(|| format!("Invalid navigation graph in {:?}", path))?;
        info!(
            path = ?path,
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "Navigation graph loaded"
        );
        Ok(graph)
    }

    pub fn parse_str(&self, json: &str) -> Result<NavGraph> {
        let value: Value = serde_json::from_str(json).context("Failed to parse graph JSON")?;
        let definition = self.definition_from_value(value)?;
        Ok(NavGraph::from_definition(definition)?)
    }

    pub fn definition_from_value(&self, value: Value) -> Result<GraphDefinition> {
        if value.get("levels").is_some() {
            let plan: FloorPlan =
                serde_json::from_value(value).context("Malformed floor-plan document")?;
            self.definition_from_plan(plan)
        } else {
            serde_json::from_value(value).context("Malformed graph definition")
        }
    }

    fn definition_from_plan(&self, mut plan: FloorPlan) -> Result<GraphDefinition> {
        let name = match &self.level {
            Some(level) => level.clone(),
            None if plan.levels.contains_key(DEFAULT_LEVEL) => DEFAULT_LEVEL.to_string(),
            None => plan
                .levels
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("Floor plan has no levels"))?,
        };
        let level = plan
            .levels
            .remove(&name)
            .ok_or_else(|| anyhow!("Floor plan has no level '{}'", name))?;
        debug!(level = %name, "Reading floor-plan level");

        let mut definition = GraphDefinition::default();
        for (index, raw) in level.vertices.iter().enumerate() {
            let coordinate = |i: usize| raw.get(i).and_then(Value::as_f64);
            let (Some(x), Some(y)) = (coordinate(0), coordinate(1)) else {
                bail!("Vertex {} must start with numeric x and y", index);
            };
            let name = raw
                .get(2)
                .and_then(|attrs| attrs.get("name"))
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            definition.vertices.push(VertexSpec {
                id: VertexId(index as u64),
                name,
                position: Some((x, y)),
            });
        }

        let mut seen = BTreeSet::new();
        for (index, raw) in level.lanes.iter().enumerate() {
            let endpoint = |i: usize| raw.get(i).and_then(Value::as_u64).map(VertexId);
            let (Some(from), Some(to)) = (endpoint(0), endpoint(1)) else {
                bail!("Lane {} must start with two vertex indices", index);
            };
            if !seen.insert((from.min(to), from.max(to))) {
                debug!(%from, %to, "Skipping duplicate lane");
                continue;
            }
            let weight = match self.weighting {
                EdgeWeighting::Uniform => 1.0,
                EdgeWeighting::Distance => distance(&definition, from, to)
                    .filter(|d| *d > 0.0)
                    .unwrap_or(1.0),
            };
            definition.edges.push(EdgeSpec {
                id: EdgeId(definition.edges.len() as u64),
                from,
                to,
                weight,
                bidirectional: true,
            });
        }

        Ok(definition)
    }
}

/// Dangling endpoints yield `None`; graph validation reports them.
/// Coincident vertices measure 0 and fall back to unit weight at the caller.
fn distance(definition: &GraphDefinition, from: VertexId, to: VertexId) -> Option<f64> {
    let position = |id: VertexId| {
        definition
            .vertices
            .get(usize::try_from(id.0).ok()?)
            .and_then(|vertex| vertex.position)
    };
    let (a, b) = (position(from)?, position(to)?);
    Some((a.0 - b.0).hypot(a.1 - b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FLOOR_PLAN: &str = r#"{
        "building_name": "test",
        "levels": {
            "l1": {
                "lanes": [[0, 1, {}], [1, 2, {"speed_limit": 0.0}], [2, 1, {}]],
                "vertices": [
                    [0.0, 0.0, {"name": "dock"}],
                    [3.0, 4.0, {"name": ""}],
                    [3.0, 8.0, {}]
                ]
            }
        }
    }"#;

    #[test]
    fn test_floor_plan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FLOOR_PLAN.as_bytes()).unwrap();

        let graph = GraphLoader::new().load_file(file.path()).unwrap();
        assert_eq!(graph.vertex_count(), 3);
        // duplicate 2-1 lane dropped, each lane stored in both directions
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.vertex(VertexId(0)).unwrap().name.as_deref(), Some("dock"));
        assert!(graph.vertex(VertexId(1)).unwrap().name.is_none());
        assert_eq!(graph.edge_between(VertexId(0), VertexId(1)).unwrap().weight, 5.0);
        assert!(graph.edge_between(VertexId(2), VertexId(1)).is_some());
    }

    #[test]
    fn test_uniform_weighting() {
        let graph = GraphLoader::new()
            .with_weighting(EdgeWeighting::Uniform)
            .parse_str(FLOOR_PLAN)
            .unwrap();
        assert_eq!(graph.edge_between(VertexId(0), VertexId(1)).unwrap().weight, 1.0);
    }

    #[test]
    fn test_dangling_lane_is_rejected() {
        let json = r#"{"levels": {"l1": {"vertices": [[0, 0, {}], [1, 0, {}]], "lanes": [[0, 5, {}]]}}}"#;
        let err = GraphLoader::new().parse_str(json).unwrap_err();
        assert!(err.to_string().contains("unknown vertex L5"), "{err}");
    }

    #[test]
    fn test_level_selection() {
        let json = r#"{"levels": {"b2": {"vertices": [[0, 0, {}]], "lanes": []}}}"#;
        let graph = GraphLoader::new().parse_str(json).unwrap();
        assert_eq!(graph.vertex_count(), 1);

        assert!(GraphLoader::new().with_level("l7").parse_str(json).is_err());
    }

    #[test]
    fn test_native_definition() {
        let json = r#"{
            "vertices": [{"id": 10, "position": [0.0, 0.0]}, {"id": 20}],
            "edges": [{"id": 1, "from": 10, "to": 20, "weight": 2.5}]
        }"#;
        let graph = GraphLoader::new().parse_str(json).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edge_between(VertexId(20), VertexId(10)).is_none());
    }

    #[test]
    fn test_coincident_vertices_get_unit_weight() {
        let json = r#"{"levels": {"l1": {
            "vertices": [[2.0, 2.0, {}], [2.0, 2.0, {}], [5.0, 6.0, {}]],
            "lanes": [[0, 1, {}], [1, 2, {}]]
        }}}"#;
        let graph = GraphLoader::new().parse_str(json).unwrap();
        assert_eq!(graph.edge_between(VertexId(0), VertexId(1)).unwrap().weight, 1.0);
        assert_eq!(graph.edge_between(VertexId(1), VertexId(2)).unwrap().weight, 5.0);
    }

    #[test]
    fn test_native_lane_at_highest_edge_id_is_rejected() {
        let json = r#"{
            "vertices": [{"id": 0}, {"id": 1}],
            "edges": [{"id": 18446744073709551615, "from": 0, "to": 1, "weight": 1.0, "bidirectional": true}]
        }"#;
        let err = GraphLoader::new().parse_str(json).unwrap_err();
        assert!(format!("{err:#}").contains("no edge id left"), "{err:#}");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = GraphLoader::new()
            .load_file("/no/such/graph.json")
            .unwrap_err();
        assert!(format!("{err:#}").contains("graph.json"));
    }
}
