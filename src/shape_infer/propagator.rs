//! Transactional shape propagation over a bound network.
//!
//! [`GraphShapePropagator`] works on a scratch table of port shapes copied
//! from the network. Every layer type must have a registered implementation;
//! the network is only written once the whole graph was propagated.

use super::error::{ReshapeError, Result};
use super::registry::{ShapeInferExtension, ShapeInferRegistry};
use crate::caseless;
use crate::network::{LayerShapes, Network, PortRef, Shape};
use std::collections::HashMap;

#[derive(Debug)]
pub struct GraphShapePropagator<'n> {
    registry: ShapeInferRegistry,
    network: Option<&'n mut Network>,
}

impl<'n> GraphShapePropagator<'n> {
    pub fn new(registry: ShapeInferRegistry) -> Self {
        Self { registry, network: None }
    }

    pub fn with_built_ins() -> Self {
        Self::new(ShapeInferRegistry::with_built_ins())
    }

    /// Binds the network later runs operate on, replacing any previous one.
    pub fn bind(&mut self, network: &'n mut Network) {
        self.network = Some(network);
    }

    pub fn unbind(&mut self) -> Option<&'n mut Network> {
        self.network.take()
    }

    pub fn is_bound(&self) -> bool {
        self.network.is_some()
    }

    pub fn network(&self) -> Option<&Network> {
        self.network.as_deref()
    }

    pub fn registry(&self) -> &ShapeInferRegistry {
        &self.registry
    }

    pub fn add_extension(&mut self, extension: &dyn ShapeInferExtension) -> Result<()> {
        self.registry.add_extension(extension).map(|_| ())
    }

    /// Propagates shapes through the bound network.
    ///
    /// `input_shapes` is keyed by layer name. Named `Const` layers and names
    /// that match no layer are skipped.
    pub fn run(&mut self, input_shapes: &HashMap<String, Shape>) -> Result<()> {
        let network = self.network.as_deref_mut().ok_or(ReshapeError::NetworkNotBound)?;
        let shapes = propagate(network, &self.registry, input_shapes)?;
        network.apply_shapes(shapes)?;
        log::debug!("committed propagated shapes to '{}'", network.name);
        Ok(())
    }
}

fn propagate(
    network: &Network,
    registry: &ShapeInferRegistry,
    input_shapes: &HashMap<String, Shape>,
) -> Result<Vec<LayerShapes>> {
    let mut scratch = network.snapshot_shapes();

    for layer in network.layers() {
        let Some(shape) = input_shapes.get(&layer.name) else {
            continue;
        };
        if caseless::eq(&layer.layer_type, "const") {
            continue;
        }
        if layer.outputs.len() != 1 {
            return Err(ReshapeError::InvalidInputPorts {
                layer: layer.name.clone(),
                count: layer.outputs.len(),
            });
        }
        scratch[layer.id].outputs[0] = shape.clone();
    }

    for id in network.topological_order()? {
        let layer = network.layer(id)?;
        let implementation = registry.lookup(&layer.layer_type)?;

        let in_shapes = if layer.inputs.is_empty() {
            scratch[id].outputs.clone()
        } else {
            scratch[id].inputs.clone()
        };
        let out_shapes = implementation
            .infer_shapes(&in_shapes, &layer.params, &layer.blobs)
            .map_err(|source| ReshapeError::Inference {
                layer: layer.name.clone(),
                source,
            })?;
        if out_shapes.len() != layer.outputs.len() {
            return Err(ReshapeError::ShapeCountMismatch {
                layer: layer.name.clone(),
                expected: layer.outputs.len(),
                actual: out_shapes.len(),
            });
        }

        for (port, shape) in out_shapes.iter().enumerate() {
            for consumer in network.consumers_of(PortRef::new(id, port)) {
                scratch[consumer.layer].inputs[consumer.port] = shape.clone();
            }
        }
        log::debug!("propagated '{}': {:?}", layer.name, out_shapes);
        scratch[id].outputs = out_shapes;
    }
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Layer;

    fn network() -> Network {
        let mut net = Network::new("clone");
        net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 8])).unwrap();
        net.add_layer(Layer::new("act", "ReLU").with_input("x", vec![1, 8]).with_output("act", vec![1, 8]))
            .unwrap();
        net.connect("data", 0, "act", 0).unwrap();
        net
    }

    #[test]
    fn test_unbound_run_fails() {
        let mut propagator = GraphShapePropagator::with_built_ins();
        assert!(!propagator.is_bound());
        assert_eq!(propagator.run(&HashMap::new()), Err(ReshapeError::NetworkNotBound));
    }

    #[test]
    fn test_run_commits_shapes() {
        let mut net = network();
        {
            let mut propagator = GraphShapePropagator::with_built_ins();
            propagator.bind(&mut net);
            let shapes = HashMap::from([("data".to_string(), vec![4, 8]), ("ghost".to_string(), vec![1])]);
            propagator.run(&shapes).unwrap();
            let bound = propagator.network().unwrap();
            assert_eq!(bound.layer_by_name("act").unwrap().outputs[0].shape, vec![4, 8]);
            assert!(propagator.unbind().is_some());
            assert!(!propagator.is_bound());
        }

        let act = net.layer_by_name("act").unwrap();
        assert_eq!(act.inputs[0].shape, vec![4, 8]);
        assert_eq!(act.outputs[0].shape, vec![4, 8]);
    }

    #[test]
    fn test_input_with_two_outputs_is_rejected() {
        let mut net = Network::new("split");
        net.add_layer(
            Layer::new("data", "Input")
                .with_output("a", vec![1])
                .with_output("b", vec![1]),
        )
        .unwrap();
        let mut propagator = GraphShapePropagator::with_built_ins();
        propagator.bind(&mut net);
        let err = propagator.run(&HashMap::from([("data".to_string(), vec![2])])).unwrap_err();
        assert_eq!(err, ReshapeError::InvalidInputPorts { layer: "data".to_string(), count: 2 });
    }
}
