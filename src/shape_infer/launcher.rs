//! Per-layer shape inference state used by the [`Reshaper`](super::Reshaper).
//!
//! A [`Launcher`] wraps one layer for the lifetime of an engine. It snapshots
//! what it needs from the layer when it is created (ports, producers, params,
//! blobs, declared shapes), holds the shapes assigned during a run, and writes
//! them back with [`Launcher::apply_changes`]. Its behaviour depends on the
//! [`LauncherKind`] picked by the [`LauncherFactory`](super::LauncherFactory).

use super::error::{ReshapeError, Result};
use super::registry::ShapeInferImpl;
use crate::caseless;
use crate::network::{Blobs, Layer, LayerParams, Network, PortRef, Shape};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum LauncherKind {
    /// Computes outputs with a registered implementation.
    Ordinary(Arc<dyn ShapeInferImpl>),
    /// Graph source whose shape is set from outside (`Input`, read-side `Memory`).
    Input,
    /// Constant data; the shape is that of the stored blob.
    Constant,
    /// Write side of a memory cell; only records its input shapes.
    MemoryOutput,
    /// No implementation is known for the type; shapes stay as they are.
    PassThrough,
}

impl LauncherKind {
    pub fn name(&self) -> &'static str {
        match self {
            LauncherKind::Ordinary(_) => "ordinary",
            LauncherKind::Input => "input",
            LauncherKind::Constant => "constant",
            LauncherKind::MemoryOutput => "memory-output",
            LauncherKind::PassThrough => "pass-through",
        }
    }
}

impl fmt::Debug for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Producer of an input port, addressed by layer name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub layer: String,
    pub port: usize,
}

#[derive(Debug, Clone)]
pub struct Launcher {
    layer_name: String,
    layer_type: String,
    kind: LauncherKind,
    params: LayerParams,
    blobs: Blobs,
    sources: Vec<Option<Source>>,
    output_names: Vec<String>,
    declared_inputs: Vec<Shape>,
    declared_outputs: Vec<Shape>,
    // Per-run state, cleared by `reset`.
    in_shapes: Option<Vec<Shape>>,
    out_shapes: Vec<Option<Shape>>,
}

impl Launcher {
    /// Creates a launcher for `layer`, resolving its producers in `network`.
    pub fn new(layer: &Layer, network: &Network, kind: LauncherKind) -> Result<Self> {
        let sources = resolve_sources(layer, network)?;

        let mut declared_outputs = layer.output_shapes();
        if matches!(kind, LauncherKind::Constant) {
            if let (Some(blob), Some(shape)) = (layer.blobs.values().next(), declared_outputs.first_mut()) {
                *shape = blob.shape().to_vec();
            }
        }

        Ok(Self {
            layer_name: layer.name.clone(),
            layer_type: layer.layer_type.clone(),
            kind,
            params: layer.params.clone(),
            blobs: layer.blobs.clone(),
            sources,
            output_names: layer.outputs.iter().map(|port| port.name.clone()).collect(),
            declared_inputs: layer.input_shapes(),
            out_shapes: vec![None; declared_outputs.len()],
            declared_outputs,
            in_shapes: None,
        })
    }

    /// Fresh ordinary launcher for the same layer bound to `implementation`.
    pub fn rebind(&self, implementation: Arc<dyn ShapeInferImpl>) -> Self {
        let mut launcher = Self {
            kind: LauncherKind::Ordinary(implementation),
            ..self.clone()
        };
        launcher.reset();
        launcher
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn kind(&self) -> &LauncherKind {
        &self.kind
    }

    pub fn has_type(&self, layer_type: &str) -> bool {
        caseless::eq(&self.layer_type, layer_type)
    }

    /// Fails unless `layer` still has the ports and producers this launcher
    /// was built from.
    pub fn check_layer(&self, layer: &Layer, network: &Network) -> Result<()> {
        let same_ports = layer.name == self.layer_name
            && layer.inputs.len() == self.sources.len()
            && layer.outputs.iter().map(|port| &port.name).eq(&self.output_names);
        if !same_ports || resolve_sources(layer, network)? != self.sources {
            return Err(ReshapeError::UnsupportedModel(format!(
                "layer '{}' does not match the network the reshaper was built for",
                self.layer_name
            )));
        }
        Ok(())
    }

    /// Forgets every shape assigned or computed in a previous run.
    pub fn reset(&mut self) {
        self.in_shapes = None;
        self.out_shapes.iter_mut().for_each(|shape| *shape = None);
    }

    /// Assigns an explicit shape to the output port named `port_name`.
    pub fn set_shape(&mut self, shape: Shape, port_name: &str) -> Result<()> {
        let index = self.output_index(port_name)?;
        if matches!(self.kind, LauncherKind::Constant) {
            log::warn!(
                "ignoring shape {:?} requested for constant layer '{}'; constant shape is {:?}",
                shape,
                self.layer_name,
                self.declared_outputs[index]
            );
            return Ok(());
        }
        self.out_shapes[index] = Some(shape);
        Ok(())
    }

    /// Uses the shape the port had when the launcher was created.
    pub fn set_default_shape_from_declaration(&mut self, port_name: &str) -> Result<()> {
        let index = self.output_index(port_name)?;
        self.out_shapes[index] = Some(self.declared_outputs[index].clone());
        Ok(())
    }

    /// Current shape of output `port`, as seen by consumers.
    pub fn output_shape(&self, port: usize) -> Result<Shape> {
        let declared = self.declared_outputs.get(port).ok_or_else(|| ReshapeError::PortNotFound {
            layer: self.layer_name.clone(),
            port: format!("#{port}"),
        })?;
        match (&self.out_shapes[port], &self.kind) {
            (Some(shape), _) => Ok(shape.clone()),
            (None, LauncherKind::Ordinary(_)) | (None, LauncherKind::Input) => Err(ReshapeError::ShapeNotComputed {
                layer: self.layer_name.clone(),
                port,
            }),
            (None, _) => Ok(declared.clone()),
        }
    }

    /// Collects the current shapes of the producers feeding this layer.
    /// Unconnected input ports keep their declared shape.
    pub fn input_shapes(&self, launchers: &LauncherSet) -> Result<Vec<Shape>> {
        self.sources
            .iter()
            .zip(&self.declared_inputs)
            .map(|(source, declared)| match source {
                Some(source) => launchers.get(&source.layer)?.output_shape(source.port),
                None => Ok(declared.clone()),
            })
            .collect()
    }

    /// Computes this layer's outputs from `in_shapes`.
    pub fn reshape(&mut self, in_shapes: Vec<Shape>) -> Result<()> {
        match &self.kind {
            LauncherKind::Ordinary(implementation) => {
                let out_shapes = implementation
                    .infer_shapes(&in_shapes, &self.params, &self.blobs)
                    .map_err(|source| ReshapeError::Inference {
                        layer: self.layer_name.clone(),
                        source,
                    })?;
                if out_shapes.len() != self.declared_outputs.len() {
                    return Err(ReshapeError::ShapeCountMismatch {
                        layer: self.layer_name.clone(),
                        expected: self.declared_outputs.len(),
                        actual: out_shapes.len(),
                    });
                }
                self.out_shapes = out_shapes.into_iter().map(Some).collect();
                self.in_shapes = Some(in_shapes);
            }
            LauncherKind::Input | LauncherKind::Constant | LauncherKind::MemoryOutput => {
                self.in_shapes = Some(in_shapes);
            }
            LauncherKind::PassThrough => {}
        }
        Ok(())
    }

    /// Writes the shapes of this run onto `layer`'s ports.
    pub fn apply_changes(&self, layer: &mut Layer) -> Result<()> {
        if matches!(self.kind, LauncherKind::PassThrough) {
            return Ok(());
        }
        if layer.name != self.layer_name || layer.outputs.len() != self.out_shapes.len() {
            return Err(ReshapeError::LayerNotFound(self.layer_name.clone()));
        }

        let outputs = (0..self.out_shapes.len())
            .map(|port| self.output_shape(port))
            .collect::<Result<Vec<_>>>()?;
        if let Some(in_shapes) = &self.in_shapes {
            for (port, shape) in layer.inputs.iter_mut().zip(in_shapes) {
                port.shape = shape.clone();
            }
        }
        for (port, shape) in layer.outputs.iter_mut().zip(outputs) {
            port.shape = shape;
        }
        Ok(())
    }

    fn output_index(&self, port_name: &str) -> Result<usize> {
        self.output_names
            .iter()
            .position(|name| name == port_name)
            .ok_or_else(|| ReshapeError::PortNotFound {
                layer: self.layer_name.clone(),
                port: port_name.to_string(),
            })
    }
}

/// Producer of every input port of `layer`, by layer name.
fn resolve_sources(layer: &Layer, network: &Network) -> Result<Vec<Option<Source>>> {
    let mut sources = Vec::with_capacity(layer.inputs.len());
    for port in 0..layer.inputs.len() {
        let source = match network.producer_of(PortRef::new(layer.id, port)) {
            Some(producer) => Some(Source {
                layer: network.layer(producer.layer)?.name.clone(),
                port: producer.port,
            }),
            None => None,
        };
        sources.push(source);
    }
    Ok(sources)
}

/// Launchers of one engine keyed by layer name.
///
/// Positions are stable: replacing a launcher keeps its slot.
#[derive(Debug, Clone, Default)]
pub struct LauncherSet {
    launchers: Vec<Launcher>,
    index: HashMap<String, usize>,
}

impl LauncherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a launcher, replacing the one for the same layer in place.
    pub fn insert(&mut self, launcher: Launcher) {
        match self.index.get(launcher.layer_name()) {
            Some(&slot) => self.launchers[slot] = launcher,
            None => {
                self.index.insert(launcher.layer_name.clone(), self.launchers.len());
                self.launchers.push(launcher);
            }
        }
    }

    pub fn get(&self, layer_name: &str) -> Result<&Launcher> {
        self.index
            .get(layer_name)
            .map(|&slot| &self.launchers[slot])
            .ok_or_else(|| ReshapeError::LauncherNotFound(layer_name.to_string()))
    }

    pub fn get_mut(&mut self, layer_name: &str) -> Result<&mut Launcher> {
        match self.index.get(layer_name) {
            Some(&slot) => Ok(&mut self.launchers[slot]),
            None => Err(ReshapeError::LauncherNotFound(layer_name.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Launcher> {
        self.launchers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Launcher> {
        self.launchers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }

    /// Gathers the producer shapes of `layer_name` and reshapes its launcher.
    pub fn reshape(&mut self, layer_name: &str) -> Result<()> {
        let in_shapes = self.get(layer_name)?.input_shapes(self)?;
        self.get_mut(layer_name)?.reshape(in_shapes)
    }
}
