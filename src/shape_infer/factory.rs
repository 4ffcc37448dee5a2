use super::error::{LayerRole, ReshapeError, Result};
use super::launcher::{Launcher, LauncherKind};
use super::registry::ShapeInferRegistry;
use crate::network::{Layer, Network};

/// Which side of a memory cell a `Memory` layer is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MemorySide {
    Write,
    Read,
}

/// Picks the launcher variant for a layer from its type and its role in the graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct LauncherFactory;

impl LauncherFactory {
    pub fn new() -> Self {
        Self
    }

    /// Launcher for a layer that has producers.
    ///
    /// Sources (`Input`, `Const`, read-side `Memory`) are rejected here. A
    /// type without a registered implementation gets a pass-through launcher.
    pub fn create_for_interior_layer(
        &self,
        layer: &Layer,
        network: &Network,
        registry: &ShapeInferRegistry,
    ) -> Result<Launcher> {
        let side = if layer.is_type("memory") { Some(memory_side(layer)?) } else { None };
        if side == Some(MemorySide::Read) || layer.is_type("const") || layer.is_type("input") {
            return Err(role_violation(layer, LayerRole::Intermediate));
        }

        let kind = match registry.get(&layer.layer_type) {
            Some(_) if side == Some(MemorySide::Write) => LauncherKind::MemoryOutput,
            Some(implementation) => LauncherKind::Ordinary(implementation),
            None => {
                log::warn!(
                    "no shape infer implementation for layer '{}' of type `{}`; its shapes are left as declared",
                    layer.name,
                    layer.layer_type
                );
                LauncherKind::PassThrough
            }
        };
        Launcher::new(layer, network, kind)
    }

    /// Launcher for a graph source: `Input`, `Const` or read-side `Memory`.
    pub fn create_for_input_layer(&self, layer: &Layer, network: &Network) -> Result<Launcher> {
        let kind = if layer.is_type("memory") {
            match memory_side(layer)? {
                MemorySide::Read => LauncherKind::Input,
                MemorySide::Write => return Err(role_violation(layer, LayerRole::Input)),
            }
        } else if layer.is_type("const") {
            LauncherKind::Constant
        } else if layer.is_type("input") {
            LauncherKind::Input
        } else {
            return Err(role_violation(layer, LayerRole::Input));
        };
        Launcher::new(layer, network, kind)
    }
}

/// `index = 0` is the write side; any other integer is the read side.
fn memory_side(layer: &Layer) -> Result<MemorySide> {
    let invalid = |reason: &str| ReshapeError::InvalidParameter {
        layer: layer.name.clone(),
        name: "index".to_string(),
        reason: reason.to_string(),
    };
    let raw = layer.param("index").ok_or_else(|| invalid("missing"))?;
    match raw.trim().parse::<i64>() {
        Ok(0) => Ok(MemorySide::Write),
        Ok(_) => Ok(MemorySide::Read),
        Err(_) => Err(invalid(&format!("'{raw}' is not an integer"))),
    }
}

fn role_violation(layer: &Layer, role: LayerRole) -> ReshapeError {
    ReshapeError::RoleViolation {
        layer: layer.name.clone(),
        layer_type: layer.layer_type.clone(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape_infer::error::StatusCode;

    fn network() -> Network {
        let mut net = Network::new("factory");
        net.add_layer(Layer::new("data", "input").with_output("data", vec![1, 4])).unwrap();
        net.add_layer(Layer::new("weights", "Const").with_output("weights", vec![4, 4])).unwrap();
        net.add_layer(
            Layer::new("state_in", "Memory")
                .with_param("index", "1")
                .with_output("state_in", vec![1, 4]),
        )
        .unwrap();
        net.add_layer(
            Layer::new("state_out", "Memory")
                .with_param("index", "0")
                .with_input("x", vec![1, 4]),
        )
        .unwrap();
        net.add_layer(Layer::new("act", "ReLU").with_input("x", vec![1, 4]).with_output("act", vec![1, 4]))
            .unwrap();
        net.add_layer(Layer::new("odd", "CustomOp").with_input("x", vec![1, 4]).with_output("odd", vec![1, 4]))
            .unwrap();
        net.add_layer(Layer::new("broken", "Memory").with_param("index", "x").with_output("broken", vec![1]))
            .unwrap();
        net
    }

    fn interior(net: &Network, name: &str) -> Result<Launcher> {
        let registry = ShapeInferRegistry::with_built_ins();
        LauncherFactory.create_for_interior_layer(net.layer_by_name(name).unwrap(), net, &registry)
    }

    fn source(net: &Network, name: &str) -> Result<Launcher> {
        LauncherFactory.create_for_input_layer(net.layer_by_name(name).unwrap(), net)
    }

    #[test]
    fn test_input_roles() {
        let net = network();
        assert_eq!(source(&net, "data").unwrap().kind().name(), "input");
        assert_eq!(source(&net, "weights").unwrap().kind().name(), "constant");
        assert_eq!(source(&net, "state_in").unwrap().kind().name(), "input");

        let err = source(&net, "act").unwrap_err();
        assert!(err.to_string().contains("Supported input types: Input, Const and Memory(with index=1)"));
        assert!(matches!(
            source(&net, "state_out"),
            Err(ReshapeError::RoleViolation { role: LayerRole::Input, .. })
        ));
    }

    #[test]
    fn test_interior_roles() {
        let net = network();
        assert_eq!(interior(&net, "act").unwrap().kind().name(), "ordinary");
        assert_eq!(interior(&net, "state_out").unwrap().kind().name(), "memory-output");
        assert_eq!(interior(&net, "odd").unwrap().kind().name(), "pass-through");

        for name in ["data", "weights", "state_in"] {
            assert!(matches!(
                interior(&net, name),
                Err(ReshapeError::RoleViolation { role: LayerRole::Intermediate, .. })
            ));
        }
    }

    #[test]
    fn test_memory_index_must_be_valid() {
        let net = network();
        let err = source(&net, "broken").unwrap_err();
        assert_eq!(err.status(), StatusCode::ParameterMismatch);
        assert!(matches!(interior(&net, "broken"), Err(ReshapeError::InvalidParameter { .. })));
    }

    #[test]
    fn test_nonzero_memory_index_is_read_side() {
        let mut net = Network::new("memory");
        net.add_layer(Layer::new("state", "Memory").with_param("index", "2").with_output("state", vec![1, 4]))
            .unwrap();
        assert_eq!(source(&net, "state").unwrap().kind().name(), "input");
        assert!(matches!(
            interior(&net, "state"),
            Err(ReshapeError::RoleViolation { role: LayerRole::Intermediate, .. })
        ));
    }
}
