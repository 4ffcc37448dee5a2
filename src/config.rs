//! Run configuration: which engine to use and which input shapes to set.

use crate::network::{Network, Shape};
use crate::shape_infer::{GraphShapePropagator, Reshaper, ShapeInferRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid run config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid shape '{0}': expected comma separated dimensions like 1,3,224,224")]
    InvalidShape(String),

    #[error("Invalid shape override '{0}': expected NAME=DIMS")]
    InvalidOverride(String),
}

/// Engine used for a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    /// [`Reshaper`]: input shapes keyed by port name, unknown types pass through.
    #[default]
    Legacy,
    /// [`GraphShapePropagator`]: input shapes keyed by layer name, all types required.
    Transactional,
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationMode::Legacy => f.write_str("legacy"),
            PropagationMode::Transactional => f.write_str("transactional"),
        }
    }
}

impl FromStr for PropagationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(PropagationMode::Legacy),
            "transactional" | "clone" => Ok(PropagationMode::Transactional),
            other => Err(format!("unknown propagation mode '{other}' (expected legacy or transactional)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: PropagationMode,
    pub input_shapes: HashMap<String, Shape>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: PropagationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_input_shape(mut self, name: &str, shape: Shape) -> Self {
        self.input_shapes.insert(name.to_string(), shape);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Parses `"1,3,224,224"` into a shape.
pub fn parse_shape(text: &str) -> Result<Shape, ConfigError> {
    let dims: Result<Shape, _> = text.split(',').map(|dim| dim.trim().parse::<usize>()).collect();
    match dims {
        Ok(dims) if !dims.is_empty() => Ok(dims),
        _ => Err(ConfigError::InvalidShape(text.to_string())),
    }
}

/// Parses `"data=1,3,224,224"` into a name and a shape.
pub fn parse_shape_override(text: &str) -> Result<(String, Shape), ConfigError> {
    let (name, dims) = text
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(text.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidOverride(text.to_string()));
    }
    Ok((name.to_string(), parse_shape(dims)?))
}

/// Runs the engine selected by `config` over `network`.
pub fn infer_shapes(
    network: &mut Network,
    registry: ShapeInferRegistry,
    config: &RunConfig,
) -> crate::shape_infer::Result<()> {
    log::info!(
        "inferring shapes of '{}' in {} mode with {} input override(s)",
        network.name,
        config.mode,
        config.input_shapes.len()
    );
    match config.mode {
        PropagationMode::Legacy => {
            let mut reshaper = Reshaper::with_registry(network, registry)?;
            reshaper.run(network, &config.input_shapes)
        }
        PropagationMode::Transactional => {
            let mut propagator = GraphShapePropagator::new(registry);
            propagator.bind(network);
            propagator.run(&config.input_shapes)
        }
    }
}
