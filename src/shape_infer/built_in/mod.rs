//! Built-in shape inference implementations.
//!
//! [`BuiltInShapeInferHolder`] is an extension like any other; every engine
//! starts from a registry that already contains it. Parameters are read from
//! the layer's string parameters, lists being comma separated (`"3,3"`).

mod elementwise;
mod layout;
mod spatial;

pub use elementwise::{EltwiseShapeInfer, IdentityShapeInfer, MemoryShapeInfer, SourceShapeInfer};
pub use layout::{ConcatShapeInfer, FullyConnectedShapeInfer, PermuteShapeInfer, ReshapeShapeInfer};
pub use spatial::{ConvolutionShapeInfer, PoolingShapeInfer};

use super::error::{InferError, InferResult};
use super::registry::{ShapeInferExtension, ShapeInferImpl};
use crate::network::{LayerParams, Shape};
use std::str::FromStr;
use std::sync::Arc;

/// Extension carrying the implementations every engine starts with.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltInShapeInferHolder;

impl BuiltInShapeInferHolder {
    pub const TYPES: &'static [&'static str] = &[
        "Input",
        "Const",
        "Memory",
        "ReLU",
        "Sigmoid",
        "TanH",
        "ELU",
        "Clamp",
        "Activation",
        "Power",
        "ScaleShift",
        "BatchNormalization",
        "Normalize",
        "Norm",
        "LRN",
        "SoftMax",
        "Dropout",
        "Copy",
        "Eltwise",
        "Convolution",
        "Pooling",
        "Concat",
        "FullyConnected",
        "InnerProduct",
        "Reshape",
        "Permute",
    ];
}

impl ShapeInferExtension for BuiltInShapeInferHolder {
    fn shape_infer_types(&self) -> Vec<String> {
        Self::TYPES.iter().map(|name| name.to_string()).collect()
    }

    fn shape_infer_impl(&self, layer_type: &str) -> Option<Arc<dyn ShapeInferImpl>> {
        let implementation: Arc<dyn ShapeInferImpl> = match layer_type.to_ascii_lowercase().as_str() {
            "input" | "const" => Arc::new(SourceShapeInfer),
            "memory" => Arc::new(MemoryShapeInfer),
            "relu" | "sigmoid" | "tanh" | "elu" | "clamp" | "activation" | "power" | "scaleshift"
            | "batchnormalization" | "normalize" | "norm" | "lrn" | "softmax" | "dropout" | "copy" => {
                Arc::new(IdentityShapeInfer)
            }
            "eltwise" => Arc::new(EltwiseShapeInfer),
            "convolution" => Arc::new(ConvolutionShapeInfer),
            "pooling" => Arc::new(PoolingShapeInfer),
            "concat" => Arc::new(ConcatShapeInfer),
            "fullyconnected" | "innerproduct" => Arc::new(FullyConnectedShapeInfer),
            "reshape" => Arc::new(ReshapeShapeInfer),
            "permute" => Arc::new(PermuteShapeInfer),
            _ => return None,
        };
        Some(implementation)
    }
}

fn parse_list<T: FromStr>(name: &str, value: &str) -> InferResult<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|_| InferError::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn list_param<T: FromStr>(params: &LayerParams, name: &str) -> InferResult<Option<Vec<T>>> {
    params.get(name).map(|value| parse_list(name, value)).transpose()
}

fn scalar_param<T: FromStr>(params: &LayerParams, name: &str) -> InferResult<Option<T>> {
    params
        .get(name)
        .map(|value| {
            value.trim().parse().map_err(|_| InferError::InvalidParameter {
                name: name.to_string(),
                value: value.clone(),
            })
        })
        .transpose()
}

fn required<T>(value: Option<T>, name: &str) -> InferResult<T> {
    value.ok_or_else(|| InferError::MissingParameter(name.to_string()))
}

/// Returns the first input shape, failing when there is none.
fn first_input(in_shapes: &[Shape]) -> InferResult<&Shape> {
    in_shapes.first().ok_or(InferError::InputCount { expected: 1, actual: 0 })
}

/// Number of elements in `shape`, failing instead of wrapping.
fn element_count(op: &str, shape: &Shape) -> InferResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, &dim| count.checked_mul(dim))
        .ok_or_else(|| overflow(op, shape))
}

fn overflow(op: &str, shape: &Shape) -> InferError {
    InferError::Overflow { op: op.to_string(), shape: shape.clone() }
}

/// Resolves a possibly negative axis against `rank`.
fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    (0..rank as i64).contains(&resolved).then_some(resolved as usize)
}
