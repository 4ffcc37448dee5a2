//! Launcher-based shape inference engine.
//!
//! A [`Reshaper`] is built once for a network. It sorts the layers, creates a
//! [`Launcher`] per layer and can then be run any number of times with
//! different input shapes. Shapes are computed for the whole graph first and
//! only written to the network once every layer succeeded.

use super::error::{ReshapeError, Result};
use super::factory::LauncherFactory;
use super::launcher::{Launcher, LauncherSet};
use super::registry::{ShapeInferExtension, ShapeInferRegistry};
use crate::network::{LayerId, Network, Shape};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct Reshaper {
    registry: ShapeInferRegistry,
    input_layers: Vec<String>,
    sorted_layers: Vec<String>,
    launchers: LauncherSet,
}

impl Reshaper {
    /// Builds a reshaper for `network` using the built-in implementations.
    pub fn new(network: &Network) -> Result<Self> {
        Self::with_registry(network, ShapeInferRegistry::with_built_ins())
    }

    pub fn with_registry(network: &Network, registry: ShapeInferRegistry) -> Result<Self> {
        let input_ids = network.input_layers();
        let order = network
            .topological_order()
            .map_err(|err| ReshapeError::UnsupportedModel(err.to_string()))?;
        if input_ids.is_empty() || order.is_empty() {
            return Err(ReshapeError::UnsupportedModel(
                "failed to collect inputs and layers".to_string(),
            ));
        }

        let inputs: HashSet<LayerId> = input_ids.iter().copied().collect();
        let factory = LauncherFactory::new();
        let mut launchers = LauncherSet::new();
        let mut sorted_layers = Vec::with_capacity(order.len());
        for id in order {
            let layer = network.layer(id)?;
            let launcher = if inputs.contains(&id) {
                factory.create_for_input_layer(layer, network)?
            } else {
                factory.create_for_interior_layer(layer, network, &registry)?
            };
            launchers.insert(launcher);
            sorted_layers.push(layer.name.clone());
        }

        let input_layers = input_ids
            .into_iter()
            .map(|id| network.layer(id).map(|layer| layer.name.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log::debug!(
            "reshaper built for '{}': {} layers, inputs [{}]",
            network.name,
            sorted_layers.len(),
            input_layers.join(", ")
        );
        Ok(Self {
            registry,
            input_layers,
            sorted_layers,
            launchers,
        })
    }

    /// Registers an extension and rebinds every launcher of the added types
    /// to its implementation.
    ///
    /// Nothing changes if the extension is refused.
    pub fn add_extension(&mut self, extension: &dyn ShapeInferExtension) -> Result<()> {
        let added = self.registry.add_extension(extension)?;
        for layer_type in &added {
            let implementation = self.registry.lookup(layer_type)?;
            let rebound: Vec<Launcher> = self
                .launchers
                .iter()
                .filter(|launcher| launcher.has_type(layer_type))
                .map(|launcher| launcher.rebind(implementation.clone()))
                .collect();
            for launcher in rebound {
                log::debug!("layer '{}' rebound to extension type `{}`", launcher.layer_name(), layer_type);
                self.launchers.insert(launcher);
            }
        }
        Ok(())
    }

    /// Infers the shapes of every layer and writes them onto `network`.
    ///
    /// `input_shapes` is keyed by output port name of the input layers; ports
    /// without an entry keep their declared shape. `network` must have the
    /// structure the reshaper was built from, otherwise the run fails before
    /// anything is written.
    pub fn run(&mut self, network: &mut Network, input_shapes: &HashMap<String, Shape>) -> Result<()> {
        let ids = self
            .sorted_layers
            .iter()
            .map(|name| {
                network
                    .layer_id(name)
                    .map_err(|_| ReshapeError::LayerNotFound(name.clone()))
            })
            .collect::<Result<Vec<LayerId>>>()?;
        for (name, &id) in self.sorted_layers.iter().zip(&ids) {
            self.launchers.get(name)?.check_layer(network.layer(id)?, network)?;
        }

        // Per-run shape state lives in a fresh copy; the engine's launchers are never run.
        let mut launchers = self.launchers.clone();
        launchers.iter_mut().for_each(Launcher::reset);

        for name in &self.input_layers {
            let id = network.layer_id(name).map_err(|_| ReshapeError::LayerNotFound(name.clone()))?;
            let launcher = launchers.get_mut(name)?;
            for port in &network.layer(id)?.outputs {
                match input_shapes.get(&port.name) {
                    Some(shape) => launcher.set_shape(shape.clone(), &port.name)?,
                    None => launcher.set_default_shape_from_declaration(&port.name)?,
                }
            }
        }

        for (name, &id) in self.sorted_layers.iter().zip(&ids) {
            launchers.reshape(name)?;
            if log::log_enabled!(log::Level::Debug) {
                let launcher = launchers.get(name)?;
                let outputs: Vec<String> = (0..network.layer(id)?.outputs.len())
                    .map(|port| match launcher.output_shape(port) {
                        Ok(shape) => format!("{shape:?}"),
                        Err(_) => "?".to_string(),
                    })
                    .collect();
                log::debug!("reshaped '{}' ({:?}): [{}]", name, launcher.kind(), outputs.join(", "));
            }
        }

        for (name, id) in self.sorted_layers.iter().zip(ids) {
            launchers.get(name)?.apply_changes(network.layer_mut(id)?)?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &ShapeInferRegistry {
        &self.registry
    }

    pub fn launcher(&self, layer_name: &str) -> Result<&Launcher> {
        self.launchers.get(layer_name)
    }

    /// Layer names in the order they are reshaped.
    pub fn sorted_layers(&self) -> &[String] {
        &self.sorted_layers
    }

    pub fn input_layers(&self) -> &[String] {
        &self.input_layers
    }
}
