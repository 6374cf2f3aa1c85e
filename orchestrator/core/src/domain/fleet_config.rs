// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Fleet Configuration Types
//
// Defines the configuration schema for a Waypoint fleet coordinator:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Traffic arbitration tuning (stall threshold, tie-break, junction degree)
// - Robot kinematics and simulation clock
// - Event bus sizing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const API_VERSION: &str = "waypoint.dev/v1";
pub const KIND: &str = "FleetConfig";

/// Top-level fleet configuration manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfigManifest {
    /// API version (must be "waypoint.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "FleetConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: FleetConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable fleet name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfigSpec {
    #[serde(default)]
    pub traffic: TrafficConfig,

    #[serde(default)]
    pub robot: RobotConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub events: EventConfig,
}

/// Order in which robots are evaluated each tick. Whoever is evaluated
/// first wins a segment requested by several robots in the same tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakPolicy {
    /// Ascending robot id.
    #[default]
    LowestId,
    /// Longest stall first, then ascending robot id.
    Aging,
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreakPolicy::LowestId => f.write_str("lowest-id"),
            TieBreakPolicy::Aging => f.write_str("aging"),
        }
    }
}

impl FromStr for TieBreakPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "lowest-id" | "lowest_id" => Ok(TieBreakPolicy::LowestId),
            "aging" => Ok(TieBreakPolicy::Aging),
            other => anyhow::bail!("Unknown tie-break policy '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Consecutive waiting ticks tolerated before a robot is declared Blocked
    /// Default: 180 (three seconds at 60 ticks per second)
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    #[serde(default)]
    pub tie_break: TieBreakPolicy,

    /// Vertices with at least this many distinct neighbours are exclusive.
    /// 0, the default, makes every vertex exclusive; 3 restricts exclusion
    /// to junctions and lets robots share plain corridor vertices.
    #[serde(default = "default_junction_min_degree")]
    pub junction_min_degree: usize,

    /// Treat an edge and its reverse twin as one physical lane
    #[serde(default = "default_true")]
    pub lane_exclusive: bool,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
            tie_break: TieBreakPolicy::default(),
            junction_min_degree: default_junction_min_degree(),
            lane_exclusive: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Distance units per second
    #[serde(default = "default_robot_speed")]
    pub speed: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            speed: default_robot_speed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Wall-clock interval between ticks when ticking automatically
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated seconds advanced per tick
    #[serde(default = "default_delta_seconds")]
    pub delta_seconds: f64,

    /// Drive ticks from a timer; when false ticks only happen on request
    #[serde(default = "default_true")]
    pub auto_tick: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            delta_seconds: default_delta_seconds(),
            auto_tick: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Broadcast channel capacity; slow subscribers lag beyond this
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stall_threshold() -> u32 {
    180
}

fn default_junction_min_degree() -> usize {
    0
}

fn default_robot_speed() -> f64 {
    0.8
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_delta_seconds() -> f64 {
    1.0 / 60.0
}

fn default_bus_capacity() -> usize {
    1000
}

impl Default for FleetConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "waypoint-fleet".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: FleetConfigSpec::default(),
        }
    }
}

impl FleetConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WAYPOINT_CONFIG_PATH environment variable
    /// 2. ./waypoint-config.yaml (working directory)
    /// 3. ~/.waypoint/config.yaml (user home)
    /// 4. /etc/waypoint/config.yaml (system, Unix) or C:\ProgramData\Waypoint\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WAYPOINT_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./waypoint-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".waypoint").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/waypoint/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Waypoint\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    /// An explicit path must exist and parse.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WAYPOINT_STALL_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(threshold) => {
                    tracing::info!("Environment override: WAYPOINT_STALL_THRESHOLD={}", threshold);
                    self.spec.traffic.stall_threshold = threshold;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for WAYPOINT_STALL_THRESHOLD: '{}'. Expected a tick count. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("WAYPOINT_TIE_BREAK") {
            match val.parse::<TieBreakPolicy>() {
                Ok(policy) => {
                    tracing::info!("Environment override: WAYPOINT_TIE_BREAK={}", policy);
                    self.spec.traffic.tie_break = policy;
                }
                Err(e) => tracing::warn!("Invalid value for WAYPOINT_TIE_BREAK: {}. Ignoring.", e),
            }
        }

        if let Ok(val) = std::env::var("WAYPOINT_ROBOT_SPEED") {
            match val.parse::<f64>() {
                Ok(speed) => {
                    tracing::info!("Environment override: WAYPOINT_ROBOT_SPEED={}", speed);
                    self.spec.robot.speed = speed;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for WAYPOINT_ROBOT_SPEED: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let speed = self.spec.robot.speed;
        if !speed.is_finite() || speed <= 0.0 {
            anyhow::bail!("spec.robot.speed must be a positive number, got {}", speed);
        }

        let dt = self.spec.simulation.delta_seconds;
        if !dt.is_finite() || dt <= 0.0 {
            anyhow::bail!(
                "spec.simulation.delta_seconds must be a positive number, got {}",
                dt
            );
        }

        if self.spec.simulation.tick_interval_ms == 0 {
            anyhow::bail!("spec.simulation.tick_interval_ms must be at least 1");
        }

        if self.spec.events.bus_capacity == 0 {
            anyhow::bail!("spec.events.bus_capacity must be at least 1");
        }

        Ok(())
    }
}
