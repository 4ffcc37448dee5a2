use super::{first_input, required, scalar_param};
use crate::network::{Blobs, LayerParams, Shape};
use crate::shape_infer::error::{InferError, InferResult};
use crate::shape_infer::registry::ShapeInferImpl;

/// Graph sources (`Input`, `Const`): the given shapes are the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceShapeInfer;

impl ShapeInferImpl for SourceShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], _params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        Ok(in_shapes.to_vec())
    }
}

/// Shape-preserving layers: one output shaped like the first input.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityShapeInfer;

impl ShapeInferImpl for IdentityShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], _params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        Ok(vec![first_input(in_shapes)?.clone()])
    }
}

/// Element-wise combination of equally shaped inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EltwiseShapeInfer;

impl ShapeInferImpl for EltwiseShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], _params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let first = first_input(in_shapes)?;
        if let Some(other) = in_shapes.iter().find(|shape| *shape != first) {
            return Err(InferError::IncompatibleShapes {
                op: "Eltwise".to_string(),
                shape1: first.clone(),
                shape2: other.clone(),
            });
        }
        Ok(vec![first.clone()])
    }
}

/// Recurrent memory cell. The read side (`index` = 1) yields its state shape,
/// the write side (`index` = 0) has no outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryShapeInfer;

impl ShapeInferImpl for MemoryShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let index: i64 = required(scalar_param(params, "index")?, "index")?;
        if index == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![first_input(in_shapes)?.clone()])
    }
}
