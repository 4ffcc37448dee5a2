//! # RustyReshape: shape inference for layer graphs
//!
//! **RustyReshape** computes the tensor shape of every port in a network of
//! layers once the shapes of its inputs are known. Shape rules are looked up
//! per layer type in a registry that starts with a set of built-in layer
//! types and can be extended from outside.
//!
//! ## Usage Example
//!
//! ```
//! use rustyreshape::config::{infer_shapes, RunConfig};
//! use rustyreshape::network::{Layer, Network};
//! use rustyreshape::shape_infer::ShapeInferRegistry;
//!
//! // 1. Describe the graph with its declared shapes
//! let mut net = Network::new("demo");
//! net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 3, 32, 32]))?;
//! net.add_layer(
//!     Layer::new("conv", "Convolution")
//!         .with_param("kernel", "3,3")
//!         .with_param("output", "16")
//!         .with_input("x", vec![1, 3, 32, 32])
//!         .with_output("conv", vec![1, 16, 30, 30]),
//! )?;
//! net.connect("data", 0, "conv", 0)?;
//!
//! // 2. Ask for a new input shape
//! let config = RunConfig::new().with_input_shape("data", vec![4, 3, 64, 64]);
//! infer_shapes(&mut net, ShapeInferRegistry::with_built_ins(), &config)?;
//!
//! // 3. Every port now carries the propagated shape
//! assert_eq!(net.layer_by_name("conv").unwrap().outputs[0].shape, vec![4, 16, 62, 62]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod caseless;
pub mod config;
pub mod network;
pub mod shape_infer;
