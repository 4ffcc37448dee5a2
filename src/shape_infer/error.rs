//! Error types of the shape inference engine.

use crate::network::{NetworkError, Shape};
use std::fmt;
use thiserror::Error;

/// Failure reported by a single shape inference implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferError {
    #[error("Expected {expected} input shape(s), got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("Invalid tensor rank: expected {expected}D, got {actual}D")]
    InvalidRank { expected: usize, actual: usize },

    #[error("Incompatible shapes for operation '{op}': {shape1:?} and {shape2:?}")]
    IncompatibleShapes { op: String, shape1: Shape, shape2: Shape },

    #[error("Input shape {shape:?} is too small for '{op}'")]
    ShapeTooSmall { op: String, shape: Shape },

    #[error("Shape arithmetic overflows for '{op}' with input {shape:?}")]
    Overflow { op: String, shape: Shape },

    #[error("Required parameter '{0}' is missing")]
    MissingParameter(String),

    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    #[error("{0}")]
    Custom(String),
}

pub type InferResult<T> = std::result::Result<T, InferError>;

/// Coarse status attached to every [`ReshapeError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatusCode {
    GeneralError,
    NotFound,
    ParameterMismatch,
    Unexpected,
}

/// Which role a layer was found in when its type does not allow it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayerRole {
    Input,
    Intermediate,
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerRole::Input => {
                f.write_str("input. Supported input types: Input, Const and Memory(with index=1)")
            }
            LayerRole::Intermediate => f.write_str("an intermediate layer in the network"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReshapeError {
    #[error("Graph error: {0}")]
    Network(#[from] NetworkError),

    #[error("Unsupported model for shape inference: {0}")]
    UnsupportedModel(String),

    #[error("Failed to add extension with already registered types: {}", .0.join(", "))]
    DuplicateType(Vec<String>),

    #[error("Failed to reshape: layer '{layer}' with type `{layer_type}` can't be {role}")]
    RoleViolation {
        layer: String,
        layer_type: String,
        role: LayerRole,
    },

    #[error("Shape infer implementation was not found for type {0}")]
    NotFound(String),

    #[error("Extension lists type `{0}` but provides no shape infer implementation for it")]
    ImplementationNotFound(String),

    #[error("Layer '{layer}' has {expected} output port(s), but shape inference returned {actual} shape(s)")]
    ShapeCountMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("Input layer '{layer}' has {count} output ports; input layers can have only one output port")]
    InvalidInputPorts { layer: String, count: usize },

    #[error("Failed to reshape layer '{0}': can't find the corresponding launcher")]
    LauncherNotFound(String),

    #[error("Layer '{0}' is not part of the network being reshaped")]
    LayerNotFound(String),

    #[error("Layer '{layer}' has no port '{port}'")]
    PortNotFound { layer: String, port: String },

    #[error("Output {port} of layer '{layer}' was read before its shape was computed")]
    ShapeNotComputed { layer: String, port: usize },

    #[error("Cannot infer shapes! Network is not bound")]
    NetworkNotBound,

    #[error("Invalid parameter '{name}' of layer '{layer}': {reason}")]
    InvalidParameter {
        layer: String,
        name: String,
        reason: String,
    },

    #[error("Failed to infer shapes for layer '{layer}': {source}")]
    Inference {
        layer: String,
        #[source]
        source: InferError,
    },
}

impl ReshapeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ReshapeError::NotFound(_) | ReshapeError::ImplementationNotFound(_) => StatusCode::NotFound,
            ReshapeError::InvalidParameter { .. } => StatusCode::ParameterMismatch,
            ReshapeError::LauncherNotFound(_) | ReshapeError::ShapeNotComputed { .. } => StatusCode::Unexpected,
            _ => StatusCode::GeneralError,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReshapeError>;
