//! Integration tests for the launcher-based reshaper.

use ndarray::{ArrayD, IxDyn};
use rustyreshape::network::{Blobs, Layer, LayerParams, Network, Shape};
use rustyreshape::shape_infer::{
    ExtensionSet, InferError, InferResult, LayerRole, ReshapeError, Reshaper, ShapeInferRegistry, StatusCode,
};
use std::collections::HashMap;

fn shapes(pairs: &[(&str, Shape)]) -> HashMap<String, Shape> {
    pairs.iter().map(|(name, shape)| (name.to_string(), shape.clone())).collect()
}

/// `A: Input -> B: Convolution(3x3, pad 1, 64 channels)`, loaded from JSON.
fn input_conv() -> Network {
    Network::from_json_str(
        r#"{
            "name": "input_conv",
            "layers": [
                {"name": "A", "type": "Input", "outputs": [{"name": "A", "shape": [1, 3, 224, 224]}]},
                {
                    "name": "B", "type": "Convolution",
                    "params": {"kernel": "3,3", "pads_begin": "1,1", "pads_end": "1,1", "output": "64"},
                    "inputs": [{"name": "in", "shape": [1, 3, 224, 224]}],
                    "outputs": [{"name": "B", "shape": [1, 64, 224, 224]}]
                }
            ],
            "connections": [{"from": "A", "from_port": 0, "to": "B", "to_port": 0}]
        }"#,
    )
    .unwrap()
}

/// `data -> custom(CustomOp) -> act(ReLU)`; the custom layer declares [1, 10].
fn with_custom_op() -> Network {
    let mut net = Network::new("custom");
    net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 4])).unwrap();
    net.add_layer(
        Layer::new("custom", "CustomOp")
            .with_input("x", vec![1, 4])
            .with_output("custom", vec![1, 10]),
    )
    .unwrap();
    net.add_layer(Layer::new("act", "ReLU").with_input("x", vec![0, 0]).with_output("act", vec![0, 0]))
        .unwrap();
    net.connect("data", 0, "custom", 0).unwrap();
    net.connect("custom", 0, "act", 0).unwrap();
    net
}

fn doubling(in_shapes: &[Shape], _: &LayerParams, _: &Blobs) -> InferResult<Vec<Shape>> {
    let first = in_shapes.first().ok_or(InferError::InputCount { expected: 1, actual: 0 })?;
    Ok(vec![first.iter().map(|d| d * 2).collect()])
}

#[test]
fn test_declared_shapes_flow_without_overrides() {
    let mut net = input_conv();
    let mut reshaper = Reshaper::new(&net).unwrap();
    reshaper.run(&mut net, &HashMap::new()).unwrap();

    assert_eq!(net, input_conv());
}

#[test]
fn test_override_propagates_to_convolution() {
    let mut net = input_conv();
    let mut reshaper = Reshaper::new(&net).unwrap();
    reshaper.run(&mut net, &shapes(&[("A", vec![1, 3, 32, 32])])).unwrap();

    let b = net.layer_by_name("B").unwrap();
    assert_eq!(net.layer_by_name("A").unwrap().outputs[0].shape, vec![1, 3, 32, 32]);
    assert_eq!(b.inputs[0].shape, vec![1, 3, 32, 32]);
    assert_eq!(b.outputs[0].shape, vec![1, 64, 32, 32]);
}

#[test]
fn test_repeated_runs_are_idempotent() {
    let mut net = input_conv();
    let mut reshaper = Reshaper::new(&net).unwrap();
    let overrides = shapes(&[("A", vec![2, 3, 64, 48])]);

    reshaper.run(&mut net, &overrides).unwrap();
    let first = net.clone();
    reshaper.run(&mut net, &overrides).unwrap();
    assert_eq!(net, first);
}

#[test]
fn test_const_roles() {
    let mut net = Network::new("consts");
    net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 4])).unwrap();
    net.add_layer(
        Layer::new("weights", "const")
            .with_output("weights", vec![0, 0])
            .with_blob("custom", ArrayD::zeros(IxDyn(&[1, 4]))),
    )
    .unwrap();
    net.add_layer(
        Layer::new("sum", "Eltwise")
            .with_input("a", vec![1, 4])
            .with_input("b", vec![1, 4])
            .with_output("sum", vec![1, 4]),
    )
    .unwrap();
    net.connect("data", 0, "sum", 0).unwrap();
    net.connect("weights", 0, "sum", 1).unwrap();

    let mut reshaper = Reshaper::new(&net).unwrap();
    assert_eq!(reshaper.launcher("weights").unwrap().kind().name(), "constant");

    // Overrides aimed at a constant are ignored.
    reshaper
        .run(&mut net, &shapes(&[("data", vec![1, 4]), ("weights", vec![7, 7])]))
        .unwrap();
    assert_eq!(net.layer_by_name("weights").unwrap().outputs[0].shape, vec![1, 4]);
    assert_eq!(net.layer_by_name("sum").unwrap().inputs[1].shape, vec![1, 4]);

    let mut fed = Network::new("fed_const");
    fed.add_layer(Layer::new("data", "Input").with_output("data", vec![1])).unwrap();
    fed.add_layer(Layer::new("c", "Const").with_input("x", vec![1]).with_output("c", vec![1]))
        .unwrap();
    fed.connect("data", 0, "c", 0).unwrap();
    let err = Reshaper::new(&fed).unwrap_err();
    assert_eq!(
        err,
        ReshapeError::RoleViolation {
            layer: "c".to_string(),
            layer_type: "Const".to_string(),
            role: LayerRole::Intermediate,
        }
    );
}

#[test]
fn test_unknown_input_type_is_rejected() {
    let mut net = Network::new("bad_input");
    net.add_layer(Layer::new("noise", "RandomUniform").with_output("noise", vec![4])).unwrap();
    let err = Reshaper::new(&net).unwrap_err();
    assert!(matches!(err, ReshapeError::RoleViolation { role: LayerRole::Input, .. }));
    assert!(err.to_string().contains("can't be input"));
}

#[test]
fn test_unregistered_type_passes_through() {
    let mut net = with_custom_op();
    let mut reshaper = Reshaper::new(&net).unwrap();
    assert_eq!(reshaper.launcher("custom").unwrap().kind().name(), "pass-through");

    reshaper.run(&mut net, &shapes(&[("data", vec![3, 4])])).unwrap();

    let custom = net.layer_by_name("custom").unwrap();
    assert_eq!(custom.inputs[0].shape, vec![1, 4]);
    assert_eq!(custom.outputs[0].shape, vec![1, 10]);
    // Consumers see the declared output of the pass-through layer.
    assert_eq!(net.layer_by_name("act").unwrap().outputs[0].shape, vec![1, 10]);
}

#[test]
fn test_failed_run_leaves_network_untouched() {
    let mut net = Network::new("mismatch");
    net.add_layer(Layer::new("a", "Input").with_output("a", vec![1, 8])).unwrap();
    net.add_layer(Layer::new("b", "Input").with_output("b", vec![1, 8])).unwrap();
    net.add_layer(
        Layer::new("sum", "Eltwise")
            .with_input("x", vec![1, 8])
            .with_input("y", vec![1, 8])
            .with_output("sum", vec![1, 8]),
    )
    .unwrap();
    net.connect("a", 0, "sum", 0).unwrap();
    net.connect("b", 0, "sum", 1).unwrap();

    let before = net.clone();
    let mut reshaper = Reshaper::new(&net).unwrap();
    let err = reshaper.run(&mut net, &shapes(&[("a", vec![2, 8])])).unwrap_err();

    assert!(matches!(
        err,
        ReshapeError::Inference { ref layer, source: InferError::IncompatibleShapes { .. } } if layer == "sum"
    ));
    assert_eq!(err.status(), StatusCode::GeneralError);
    assert_eq!(net, before);

    // The engine stays usable after a failure.
    reshaper.run(&mut net, &shapes(&[("a", vec![2, 8]), ("b", vec![2, 8])])).unwrap();
    assert_eq!(net.layer_by_name("sum").unwrap().outputs[0].shape, vec![2, 8]);
}

#[test]
fn test_conflicting_extension_changes_nothing() {
    let net = with_custom_op();
    let mut reshaper = Reshaper::new(&net).unwrap();
    let registered = reshaper.registry().types();

    let extension = ExtensionSet::new().with("CustomOp", doubling).with("relu", doubling);
    let err = reshaper.add_extension(&extension).unwrap_err();

    assert_eq!(err, ReshapeError::DuplicateType(vec!["relu".to_string()]));
    assert_eq!(reshaper.registry().types(), registered);
    assert!(!reshaper.registry().contains("CustomOp"));
    assert_eq!(reshaper.launcher("custom").unwrap().kind().name(), "pass-through");
}

#[test]
fn test_extension_rebinds_pass_through_layers() {
    let mut net = with_custom_op();
    let mut reshaper = Reshaper::new(&net).unwrap();
    reshaper
        .add_extension(&ExtensionSet::new().with("customop", doubling))
        .unwrap();

    assert_eq!(reshaper.launcher("custom").unwrap().kind().name(), "ordinary");
    assert_eq!(reshaper.sorted_layers(), ["data", "custom", "act"]);

    reshaper.run(&mut net, &shapes(&[("data", vec![3, 4])])).unwrap();
    assert_eq!(net.layer_by_name("custom").unwrap().outputs[0].shape, vec![6, 8]);
    assert_eq!(net.layer_by_name("act").unwrap().inputs[0].shape, vec![6, 8]);
}

#[test]
fn test_memory_cell() {
    let mut net = Network::new("recurrent");
    net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 16])).unwrap();
    net.add_layer(
        Layer::new("state_in", "Memory")
            .with_param("id", "state")
            .with_param("index", "1")
            .with_output("state_in", vec![1, 16]),
    )
    .unwrap();
    net.add_layer(
        Layer::new("sum", "Eltwise")
            .with_input("x", vec![1, 16])
            .with_input("h", vec![1, 16])
            .with_output("sum", vec![1, 16]),
    )
    .unwrap();
    net.add_layer(
        Layer::new("state_out", "Memory")
            .with_param("id", "state")
            .with_param("index", "0")
            .with_input("x", vec![1, 16]),
    )
    .unwrap();
    net.connect("data", 0, "sum", 0).unwrap();
    net.connect("state_in", 0, "sum", 1).unwrap();
    net.connect("sum", 0, "state_out", 0).unwrap();

    let mut reshaper = Reshaper::new(&net).unwrap();
    assert_eq!(reshaper.input_layers(), ["data", "state_in"]);
    assert_eq!(reshaper.launcher("state_out").unwrap().kind().name(), "memory-output");

    reshaper
        .run(&mut net, &shapes(&[("data", vec![4, 16]), ("state_in", vec![4, 16])]))
        .unwrap();
    assert_eq!(net.layer_by_name("state_out").unwrap().inputs[0].shape, vec![4, 16]);
}

#[test]
fn test_custom_registry() {
    let mut registry = ShapeInferRegistry::new();
    registry.register("Convolution", std::sync::Arc::new(doubling)).unwrap();
    let mut net = input_conv();
    let mut reshaper = Reshaper::with_registry(&net, registry).unwrap();
    reshaper.run(&mut net, &HashMap::new()).unwrap();
    assert_eq!(net.layer_by_name("B").unwrap().outputs[0].shape, vec![2, 6, 448, 448]);
}

fn relu_chain(act2_outputs: usize) -> Network {
    let mut net = Network::new("relu_chain");
    net.add_layer(Layer::new("data", "Input").with_output("data", vec![1, 4])).unwrap();
    net.add_layer(Layer::new("act", "ReLU").with_input("x", vec![1, 4]).with_output("act", vec![1, 4]))
        .unwrap();
    let mut act2 = Layer::new("act2", "ReLU").with_input("x", vec![1, 4]);
    for port in 0..act2_outputs {
        act2 = act2.with_output(format!("act2_{port}"), vec![1, 4]);
    }
    net.add_layer(act2).unwrap();
    net.connect("data", 0, "act", 0).unwrap();
    net.connect("act", 0, "act2", 0).unwrap();
    net
}

#[test]
fn test_structure_mismatch_fails_before_any_write() {
    let mut reshaper = Reshaper::new(&relu_chain(1)).unwrap();

    let mut other = relu_chain(2);
    let before = other.clone();
    let err = reshaper.run(&mut other, &shapes(&[("data", vec![9, 4])])).unwrap_err();
    assert!(matches!(err, ReshapeError::UnsupportedModel(ref message) if message.contains("act2")));
    assert_eq!(other, before);

    // Same names and ports, but act2 is fed by data instead of act.
    let mut rewired = Network::new("relu_chain");
    for layer in relu_chain(1).layers() {
        rewired.add_layer(layer.clone()).unwrap();
    }
    rewired.connect("data", 0, "act", 0).unwrap();
    rewired.connect("data", 0, "act2", 0).unwrap();
    let before = rewired.clone();
    assert!(matches!(
        reshaper.run(&mut rewired, &shapes(&[("data", vec![9, 4])])),
        Err(ReshapeError::UnsupportedModel(_))
    ));
    assert_eq!(rewired, before);
}
