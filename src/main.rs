//! Command line front end: loads a network description, infers its shapes and
//! prints them.

use clap::Parser;
use rustyreshape::config::{infer_shapes, parse_shape_override, PropagationMode, RunConfig};
use rustyreshape::network::{Network, Shape};
use rustyreshape::shape_infer::ShapeInferRegistry;
use std::fs;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "RustyReshape: shape inference for layer graphs", long_about = None)]
struct Args {
    /// Network description (JSON)
    network: PathBuf,

    /// Input shape override, NAME=DIMS (e.g. data=1,3,224,224). Repeatable.
    #[arg(short, long = "shape", value_name = "NAME=DIMS")]
    shapes: Vec<String>,

    /// Engine to run; overrides the mode from --config
    #[arg(short, long)]
    mode: Option<PropagationMode>,

    /// Run configuration (JSON) with mode and input shapes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the reshaped network description here
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut network = Network::from_json_str(&fs::read_to_string(&args.network)?)?;
    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => RunConfig::new(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    for text in &args.shapes {
        let (name, shape) = parse_shape_override(text)?;
        config.input_shapes.insert(name, shape);
    }

    infer_shapes(&mut network, ShapeInferRegistry::with_built_ins(), &config)?;

    println!("[{}] shapes after {} inference:", network.name, config.mode);
    for layer in network.layers() {
        println!(
            "  {:<24} {:<18} in: {:<32} out: {}",
            layer.name,
            layer.layer_type,
            format_shapes(layer.inputs.iter().map(|port| &port.shape)),
            format_shapes(layer.outputs.iter().map(|port| &port.shape)),
        );
    }

    if let Some(path) = &args.output {
        fs::write(path, network.to_json_string()?)?;
        log::info!("wrote reshaped network to {}", path.display());
    }
    Ok(())
}

fn format_shapes<'a>(shapes: impl Iterator<Item = &'a Shape>) -> String {
    let parts: Vec<String> = shapes.map(|shape| format!("{shape:?}")).collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" ")
    }
}
