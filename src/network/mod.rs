//! Layer graph: the network whose shapes are inferred.
//!
//! A [`Network`] owns its [`Layer`]s. Each layer has ordered input and output
//! [`Port`]s carrying shapes. Connections between ports are kept in a separate
//! adjacency index on the network (producer output port -> consumer input
//! ports), so layers never reference each other directly.

use crate::caseless;
use ndarray::ArrayD;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod desc;

pub use desc::{BlobDesc, ConnectionDesc, DescError, LayerDesc, NetworkDesc, PortDesc};

/// Stable numeric layer identifier (index of the layer inside its network).
pub type LayerId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;
/// Constant data attached to a layer.
pub type Blob = Arc<ArrayD<f32>>;
/// String-keyed layer parameters.
pub type LayerParams = BTreeMap<String, String>;
/// Named constant data blobs of a layer.
pub type Blobs = BTreeMap<String, Blob>;

pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Layer with ID {0} not found")]
    LayerNotFound(LayerId),

    #[error("Layer '{0}' not found")]
    LayerNameNotFound(String),

    #[error("Layer name '{0}' is already used in the network")]
    DuplicateLayerName(String),

    #[error("Layer '{layer}' has no {direction} port {port}")]
    PortNotFound {
        layer: String,
        port: usize,
        direction: PortDirection,
    },

    #[error("Input port {port} of layer '{layer}' already has a producer")]
    PortAlreadyConnected { layer: String, port: usize },

    #[error("The network contains a cycle through layer '{0}'")]
    Cycle(String),

    #[error("Shape snapshot does not match the network: {0}")]
    SnapshotMismatch(String),

    #[error("Blob '{blob}' of layer '{layer}' is invalid: {reason}")]
    InvalidBlob {
        layer: String,
        blob: String,
        reason: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// A connection point of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub shape: Shape,
}

impl Port {
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self { name: name.into(), shape }
    }
}

/// Address of a port: owning layer and position in its port list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub layer: LayerId,
    pub port: usize,
}

impl PortRef {
    pub fn new(layer: LayerId, port: usize) -> Self {
        Self { layer, port }
    }
}

/// Directed edge from a producer output port to a consumer input port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Assigned by [`Network::add_layer`].
    pub id: LayerId,
    pub name: String,
    pub layer_type: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub params: LayerParams,
    pub blobs: Blobs,
    /// Marks the layer as a network input even if something feeds it.
    pub is_network_input: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            layer_type: layer_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: LayerParams::new(),
            blobs: Blobs::new(),
            is_network_input: false,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.inputs.push(Port::new(name, shape));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.outputs.push(Port::new(name, shape));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_blob(mut self, name: impl Into<String>, data: ArrayD<f32>) -> Self {
        self.blobs.insert(name.into(), Arc::new(data));
        self
    }

    pub fn as_network_input(mut self) -> Self {
        self.is_network_input = true;
        self
    }

    /// Case-insensitive type check.
    pub fn is_type(&self, layer_type: &str) -> bool {
        caseless::eq(&self.layer_type, layer_type)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn output_index(&self, port_name: &str) -> Option<usize> {
        self.outputs.iter().position(|port| port.name == port_name)
    }

    pub fn input_shapes(&self) -> Vec<Shape> {
        self.inputs.iter().map(|port| port.shape.clone()).collect()
    }

    pub fn output_shapes(&self) -> Vec<Shape> {
        self.outputs.iter().map(|port| port.shape.clone()).collect()
    }
}

/// Copy of the port shapes of one layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerShapes {
    pub inputs: Vec<Shape>,
    pub outputs: Vec<Shape>,
}

/// Computation graph made of layers and port-to-port connections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Network {
    pub name: String,
    layers: Vec<Layer>,
    connections: Vec<Connection>,
    by_name: HashMap<String, LayerId>,
    /// Producer output port -> consumer input ports.
    consumers: HashMap<PortRef, Vec<PortRef>>,
    /// Consumer input port -> producer output port.
    producers: HashMap<PortRef, PortRef>,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Adds a layer and returns its id. Layer names must be unique.
    pub fn add_layer(&mut self, mut layer: Layer) -> NetworkResult<LayerId> {
        if self.by_name.contains_key(&layer.name) {
            return Err(NetworkError::DuplicateLayerName(layer.name));
        }
        let id = self.layers.len();
        layer.id = id;
        self.by_name.insert(layer.name.clone(), id);
        self.layers.push(layer);
        Ok(id)
    }

    /// Connects output `from_port` of layer `from` to input `to_port` of layer `to`.
    pub fn connect(&mut self, from: &str, from_port: usize, to: &str, to_port: usize) -> NetworkResult<()> {
        let from_id = self.layer_id(from)?;
        let to_id = self.layer_id(to)?;
        self.connect_ports(PortRef::new(from_id, from_port), PortRef::new(to_id, to_port))
    }

    pub fn connect_ports(&mut self, from: PortRef, to: PortRef) -> NetworkResult<()> {
        let producer = self.layer(from.layer)?;
        if from.port >= producer.outputs.len() {
            return Err(NetworkError::PortNotFound {
                layer: producer.name.clone(),
                port: from.port,
                direction: PortDirection::Output,
            });
        }
        let consumer = self.layer(to.layer)?;
        if to.port >= consumer.inputs.len() {
            return Err(NetworkError::PortNotFound {
                layer: consumer.name.clone(),
                port: to.port,
                direction: PortDirection::Input,
            });
        }
        if self.producers.contains_key(&to) {
            return Err(NetworkError::PortAlreadyConnected {
                layer: consumer.name.clone(),
                port: to.port,
            });
        }

        self.producers.insert(to, from);
        self.consumers.entry(from).or_default().push(to);
        self.connections.push(Connection { from, to });
        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn layer(&self, id: LayerId) -> NetworkResult<&Layer> {
        self.layers.get(id).ok_or(NetworkError::LayerNotFound(id))
    }

    /// Mutable access to a layer. Only port shapes should be changed through it;
    /// the name and port counts are indexed by the network.
    pub fn layer_mut(&mut self, id: LayerId) -> NetworkResult<&mut Layer> {
        self.layers.get_mut(id).ok_or(NetworkError::LayerNotFound(id))
    }

    pub fn layer_id(&self, name: &str) -> NetworkResult<LayerId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| NetworkError::LayerNameNotFound(name.to_string()))
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.by_name.get(name).map(|&id| &self.layers[id])
    }

    pub fn layer_by_name_mut(&mut self, name: &str) -> Option<&mut Layer> {
        let id = *self.by_name.get(name)?;
        self.layers.get_mut(id)
    }

    /// Consumer input ports fed by the given output port.
    pub fn consumers_of(&self, output: PortRef) -> &[PortRef] {
        self.consumers.get(&output).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Producer output port feeding the given input port, if connected.
    pub fn producer_of(&self, input: PortRef) -> Option<PortRef> {
        self.producers.get(&input).copied()
    }

    /// Layers with no connected input port, plus layers flagged as network inputs.
    pub fn input_layers(&self) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|layer| {
                layer.is_network_input
                    || (0..layer.inputs.len())
                        .all(|port| !self.producers.contains_key(&PortRef::new(layer.id, port)))
            })
            .map(|layer| layer.id)
            .collect()
    }

    /// Returns layer ids ordered so that every producer precedes its consumers.
    pub fn topological_order(&self) -> NetworkResult<Vec<LayerId>> {
        let mut graph = DiGraph::<LayerId, ()>::with_capacity(self.layers.len(), self.connections.len());
        let nodes: Vec<NodeIndex> = self.layers.iter().map(|layer| graph.add_node(layer.id)).collect();
        for connection in &self.connections {
            graph.update_edge(nodes[connection.from.layer], nodes[connection.to.layer], ());
        }

        toposort(&graph, None)
            .map(|sorted| sorted.into_iter().map(|index| graph[index]).collect())
            .map_err(|cycle| NetworkError::Cycle(self.layers[graph[cycle.node_id()]].name.clone()))
    }

    /// Copies the shapes of every port, indexed by layer id.
    pub fn snapshot_shapes(&self) -> Vec<LayerShapes> {
        self.layers
            .iter()
            .map(|layer| LayerShapes {
                inputs: layer.input_shapes(),
                outputs: layer.output_shapes(),
            })
            .collect()
    }

    /// Writes a full snapshot back onto the ports.
    ///
    /// The snapshot is validated against the network before anything is
    /// written, so either every port is updated or none is.
    pub fn apply_shapes(&mut self, shapes: Vec<LayerShapes>) -> NetworkResult<()> {
        if shapes.len() != self.layers.len() {
            return Err(NetworkError::SnapshotMismatch(format!(
                "expected {} layers, got {}",
                self.layers.len(),
                shapes.len()
            )));
        }
        for (layer, layer_shapes) in self.layers.iter().zip(&shapes) {
            if layer.inputs.len() != layer_shapes.inputs.len() || layer.outputs.len() != layer_shapes.outputs.len() {
                return Err(NetworkError::SnapshotMismatch(format!(
                    "port count differs for layer '{}'",
                    layer.name
                )));
            }
        }

        for (layer, layer_shapes) in self.layers.iter_mut().zip(shapes) {
            for (port, shape) in layer.inputs.iter_mut().zip(layer_shapes.inputs) {
                port.shape = shape;
            }
            for (port, shape) in layer.outputs.iter_mut().zip(layer_shapes.outputs) {
                port.shape = shape;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Network {
        let mut net = Network::new("diamond");
        net.add_layer(Layer::new("in", "Input").with_output("in", vec![1, 4])).unwrap();
        net.add_layer(Layer::new("left", "ReLU").with_input("x", vec![1, 4]).with_output("left", vec![1, 4]))
            .unwrap();
        net.add_layer(Layer::new("right", "ReLU").with_input("x", vec![1, 4]).with_output("right", vec![1, 4]))
            .unwrap();
        net.add_layer(
            Layer::new("sum", "Eltwise")
                .with_input("a", vec![1, 4])
                .with_input("b", vec![1, 4])
                .with_output("sum", vec![1, 4]),
        )
        .unwrap();
        net.connect("in", 0, "left", 0).unwrap();
        net.connect("in", 0, "right", 0).unwrap();
        net.connect("left", 0, "sum", 0).unwrap();
        net.connect("right", 0, "sum", 1).unwrap();
        net
    }

    #[test]
    fn test_topological_order_puts_producers_first() {
        let net = diamond();
        let order = net.topological_order().unwrap();
        assert_eq!(order.len(), 4);
        let position = |name: &str| order.iter().position(|&id| id == net.layer_id(name).unwrap()).unwrap();
        assert!(position("in") < position("left"));
        assert!(position("in") < position("right"));
        assert!(position("left") < position("sum"));
        assert!(position("right") < position("sum"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut net = Network::new("cycle");
        net.add_layer(Layer::new("a", "ReLU").with_input("x", vec![1]).with_output("a", vec![1])).unwrap();
        net.add_layer(Layer::new("b", "ReLU").with_input("x", vec![1]).with_output("b", vec![1])).unwrap();
        net.connect("a", 0, "b", 0).unwrap();
        net.connect("b", 0, "a", 0).unwrap();
        assert!(matches!(net.topological_order(), Err(NetworkError::Cycle(_))));
        assert!(net.input_layers().is_empty());
    }

    #[test]
    fn test_input_layers() {
        let mut net = diamond();
        assert_eq!(net.input_layers(), vec![0]);

        net.add_layer(Layer::new("state", "Memory").with_input("x", vec![1]).with_output("state", vec![1]).as_network_input())
            .unwrap();
        net.connect("sum", 0, "state", 0).unwrap();
        assert_eq!(net.input_layers(), vec![0, 4]);
    }

    #[test]
    fn test_connect_validates_ports() {
        let mut net = diamond();
        assert!(matches!(
            net.connect("in", 3, "left", 0),
            Err(NetworkError::PortNotFound { direction: PortDirection::Output, .. })
        ));
        assert!(matches!(
            net.connect("in", 0, "left", 0),
            Err(NetworkError::PortAlreadyConnected { .. })
        ));
        assert!(matches!(
            net.connect("missing", 0, "left", 0),
            Err(NetworkError::LayerNameNotFound(_))
        ));
        assert!(matches!(
            net.add_layer(Layer::new("sum", "ReLU")),
            Err(NetworkError::DuplicateLayerName(_))
        ));
    }

    #[test]
    fn test_adjacency_index() {
        let net = diamond();
        let input = PortRef::new(net.layer_id("in").unwrap(), 0);
        assert_eq!(net.consumers_of(input).len(), 2);
        let sum = net.layer_id("sum").unwrap();
        assert_eq!(
            net.producer_of(PortRef::new(sum, 1)),
            Some(PortRef::new(net.layer_id("right").unwrap(), 0))
        );
        assert!(net.consumers_of(PortRef::new(sum, 0)).is_empty());
    }

    #[test]
    fn test_apply_shapes_is_all_or_nothing() {
        let mut net = diamond();
        let before = net.snapshot_shapes();

        let mut broken = before.clone();
        broken[0].outputs[0] = vec![7, 7];
        broken[3].inputs.pop();
        assert!(net.apply_shapes(broken).is_err());
        assert_eq!(net.snapshot_shapes(), before);

        let mut changed = before.clone();
        changed[1].outputs[0] = vec![2, 4];
        net.apply_shapes(changed).unwrap();
        assert_eq!(net.layer_by_name("left").unwrap().outputs[0].shape, vec![2, 4]);
    }
}
