//! # Shape Inference Module
//!
//! Computes the tensor shape of every port of a [`Network`](crate::network::Network)
//! from the shapes of its inputs.
//!
//! ## Engines
//!
//! - [`Reshaper`]: builds one [`Launcher`] per layer up front and can be run
//!   repeatedly. Layer types without an implementation are passed through
//!   with their declared shapes.
//! - [`GraphShapePropagator`]: propagates over a scratch copy of the port
//!   shapes and commits in one write. Every layer type must be registered.
//!
//! Both engines leave the network untouched when a run fails.
//!
//! ## How It Works
//!
//! ```text
//! input shapes -> topological walk (implementation per layer type) -> shapes on every port
//! ```
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use rustyreshape::network::{Layer, Network};
//! use rustyreshape::shape_infer::Reshaper;
//!
//! let mut net = Network::new("tiny");
//! net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 16]))?;
//! net.add_layer(Layer::new("act", "ReLU").with_input("x", vec![1, 16]).with_output("act", vec![1, 16]))?;
//! net.connect("data", 0, "act", 0)?;
//!
//! let mut reshaper = Reshaper::new(&net)?;
//! reshaper.run(&mut net, &HashMap::from([("data".to_string(), vec![8, 16])]))?;
//! assert_eq!(net.layer_by_name("act").unwrap().outputs[0].shape, vec![8, 16]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod built_in;
pub mod error;
pub mod factory;
pub mod launcher;
pub mod propagator;
pub mod registry;
pub mod reshaper;

pub use built_in::BuiltInShapeInferHolder;
pub use error::{InferError, InferResult, LayerRole, ReshapeError, Result, StatusCode};
pub use factory::LauncherFactory;
pub use launcher::{Launcher, LauncherKind, LauncherSet, Source};
pub use propagator::GraphShapePropagator;
pub use registry::{ExtensionSet, ShapeInferExtension, ShapeInferImpl, ShapeInferRegistry};
pub use reshaper::Reshaper;
