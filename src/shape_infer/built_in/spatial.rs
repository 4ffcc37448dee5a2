//! Sliding-window layers over `[N, C, spatial...]` inputs.

use super::{first_input, list_param, overflow, required, scalar_param};
use crate::network::{Blobs, LayerParams, Shape};
use crate::shape_infer::error::{InferError, InferResult};
use crate::shape_infer::registry::ShapeInferImpl;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AutoPad {
    Explicit,
    Valid,
    Same,
}

/// Window geometry shared by convolution and pooling.
#[derive(Debug, Clone)]
struct Window {
    kernel: Vec<usize>,
    strides: Vec<usize>,
    pads_begin: Vec<usize>,
    pads_end: Vec<usize>,
    dilations: Vec<usize>,
    auto_pad: AutoPad,
}

impl Window {
    fn from_params(params: &LayerParams) -> InferResult<Self> {
        let kernel: Vec<usize> = required(list_param(params, "kernel")?, "kernel")?;
        let rank = kernel.len();
        let per_axis = |name: &str, default: usize| -> InferResult<Vec<usize>> {
            let values = list_param(params, name)?.unwrap_or_else(|| vec![default; rank]);
            if values.len() != rank {
                return Err(InferError::InvalidParameter {
                    name: name.to_string(),
                    value: params.get(name).cloned().unwrap_or_default(),
                });
            }
            Ok(values)
        };

        let window = Window {
            strides: per_axis("strides", 1)?,
            pads_begin: per_axis("pads_begin", 0)?,
            pads_end: per_axis("pads_end", 0)?,
            dilations: per_axis("dilations", 1)?,
            auto_pad: match params.get("auto_pad").map(String::as_str) {
                None | Some("") | Some("explicit") => AutoPad::Explicit,
                Some("valid") => AutoPad::Valid,
                Some("same_upper") | Some("same_lower") => AutoPad::Same,
                Some(other) => {
                    return Err(InferError::InvalidParameter {
                        name: "auto_pad".to_string(),
                        value: other.to_string(),
                    })
                }
            },
            kernel,
        };
        if window.strides.contains(&0) {
            return Err(InferError::InvalidParameter {
                name: "strides".to_string(),
                value: params.get("strides").cloned().unwrap_or_default(),
            });
        }
        Ok(window)
    }

    /// Output spatial dims for `input`, which must be `[N, C, spatial...]`.
    fn output_dims(&self, op: &str, input: &Shape, round_up: bool) -> InferResult<Vec<usize>> {
        let rank = self.kernel.len();
        if input.len() != rank + 2 {
            return Err(InferError::InvalidRank { expected: rank + 2, actual: input.len() });
        }

        let mut dims = Vec::with_capacity(rank);
        for axis in 0..rank {
            let size = input[axis + 2];
            let stride = self.strides[axis];
            if self.auto_pad == AutoPad::Same {
                dims.push(size.div_ceil(stride));
                continue;
            }

            let effective_kernel = (self.kernel[axis].max(1) - 1)
                .checked_mul(self.dilations[axis])
                .and_then(|span| span.checked_add(1))
                .ok_or_else(|| overflow(op, input))?;
            let padded = match self.auto_pad {
                AutoPad::Valid => Some(size),
                _ => size
                    .checked_add(self.pads_begin[axis])
                    .and_then(|padded| padded.checked_add(self.pads_end[axis])),
            }
            .ok_or_else(|| overflow(op, input))?;
            if padded < effective_kernel {
                return Err(InferError::ShapeTooSmall { op: op.to_string(), shape: input.clone() });
            }
            let span = padded - effective_kernel;
            let steps = if round_up { span.div_ceil(stride) } else { span / stride };
            dims.push(steps + 1);
        }
        Ok(dims)
    }
}

/// `[N, C_in, spatial...]` -> `[N, output, spatial_out...]`.
///
/// The output channel count comes from the `output` parameter or, when absent,
/// from the leading dimension of a weights input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvolutionShapeInfer;

impl ShapeInferImpl for ConvolutionShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let input = first_input(in_shapes)?;
        let window = Window::from_params(params)?;

        let out_channels = match scalar_param::<usize>(params, "output")? {
            Some(channels) => channels,
            None => in_shapes
                .get(1)
                .and_then(|weights| weights.first().copied())
                .ok_or_else(|| InferError::MissingParameter("output".to_string()))?,
        };

        let spatial = window.output_dims("Convolution", input, false)?;
        let mut output = vec![input[0], out_channels];
        output.extend(spatial);
        Ok(vec![output])
    }
}

/// `[N, C, spatial...]` -> `[N, C, spatial_out...]`; `rounding_type=ceil`
/// rounds partial windows up.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingShapeInfer;

impl ShapeInferImpl for PoolingShapeInfer {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, _blobs: &Blobs) -> InferResult<Vec<Shape>> {
        let input = first_input(in_shapes)?;
        let window = Window::from_params(params)?;
        let round_up = match params.get("rounding_type").map(String::as_str) {
            None | Some("floor") => false,
            Some("ceil") => true,
            Some(other) => {
                return Err(InferError::InvalidParameter {
                    name: "rounding_type".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let spatial = window.output_dims("Pooling", input, round_up)?;
        let mut output = vec![input[0], input[1]];
        output.extend(spatial);
        Ok(vec![output])
    }
}
