use super::{element_count, first_input, list_param, normalize_axis, overflow, required, scalar_param};
use crate::network::{Blobs, LayerParams, Shape};
use crate::shape_infer::error::{InferError, InferResult};
use crate::shape_infer::registry::ShapeInferImpl;

/// Joins inputs along `axis` (default 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatShapeInfer;

impl ShapeInferImpl for ConcatShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let first = first_input(in_shapes)?;
        let raw_axis: i64 = scalar_param(params, "axis")?.unwrap_or(1);
        let axis = normalize_axis(raw_axis, first.len()).ok_or_else(|| InferError::InvalidParameter {
            name: "axis".to_string(),
            value: raw_axis.to_string(),
        })?;

        let mut output = first.clone();
        for shape in &in_shapes[1..] {
            let compatible = shape.len() == first.len()
                && shape.iter().zip(first).enumerate().all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(InferError::IncompatibleShapes {
                    op: "Concat".to_string(),
                    shape1: first.clone(),
                    shape2: shape.clone(),
                });
            }
            output[axis] = output[axis]
                .checked_add(shape[axis])
                .ok_or_else(|| overflow("Concat", shape))?;
        }
        Ok(vec![output])
    }
}

/// `[N, ...]` -> `[N, out-size]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnectedShapeInfer;

impl ShapeInferImpl for FullyConnectedShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let input = first_input(in_shapes)?;
        let out_size: usize = required(scalar_param(params, "out-size")?, "out-size")?;
        let batch = *input.first().ok_or(InferError::InvalidRank { expected: 1, actual: 0 })?;
        Ok(vec![vec![batch, out_size]])
    }
}

/// Reshape by the `dim` parameter: `0` copies the input dimension at the same
/// position, a single `-1` is inferred from the element count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReshapeShapeInfer;

impl ShapeInferImpl for ReshapeShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let input = first_input(in_shapes)?;
        let dims: Vec<i64> = required(list_param(params, "dim")?, "dim")?;
        let invalid = || InferError::InvalidParameter {
            name: "dim".to_string(),
            value: params.get("dim").cloned().unwrap_or_default(),
        };

        let mut output = Vec::with_capacity(dims.len());
        let mut inferred_axis = None;
        for (axis, &dim) in dims.iter().enumerate() {
            match dim {
                0 => output.push(*input.get(axis).ok_or_else(invalid)?),
                -1 if inferred_axis.is_none() => {
                    inferred_axis = Some(axis);
                    output.push(1);
                }
                d if d > 0 => output.push(d as usize),
                _ => return Err(invalid()),
            }
        }

        let total = element_count("Reshape", input)?;
        let known = element_count("Reshape", &output)?;
        let mismatch = |output: &Shape| InferError::IncompatibleShapes {
            op: "Reshape".to_string(),
            shape1: input.clone(),
            shape2: output.clone(),
        };
        match inferred_axis {
            Some(axis) => {
                if known == 0 || total % known != 0 {
                    return Err(mismatch(&output));
                }
                output[axis] = total / known;
            }
            None if known != total => return Err(mismatch(&output)),
            None => {}
        }
        Ok(vec![output])
    }
}

/// Reorders dimensions: `output[i] = input[order[i]]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermuteShapeInfer;

impl ShapeInferImpl for PermuteShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let input = first_input(in_shapes)?;
        let order: Vec<usize> = required(list_param(params, "order")?, "order")?;

        let mut seen = vec![false; input.len()];
        let valid = order.len() == input.len()
            && order.iter().all(|&axis| axis < input.len() && !std::mem::replace(&mut seen[axis], true));
        if !valid {
            return Err(InferError::InvalidParameter {
                name: "order".to_string(),
                value: params.get("order").cloned().unwrap_or_default(),
            });
        }
        Ok(vec![order.iter().map(|&axis| input[axis]).collect()])
    }
}
