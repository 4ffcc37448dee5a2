//! Serializable description of a [`Network`].
//!
//! This is a plain JSON mirror of the in-memory graph, used by the command line
//! tool to load networks and to write back inferred shapes. Connections refer
//! to layers by name.

use super::{Layer, Network, NetworkError, PortRef};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid network description: {0}")]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDesc {
    #[serde(default)]
    pub name: String,
    pub layers: Vec<LayerDesc>,
    #[serde(default)]
    pub connections: Vec<ConnectionDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blobs: BTreeMap<String, BlobDesc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub network_input: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDesc {
    pub name: String,
    pub shape: Vec<usize>,
}

/// Constant data. Without `data` the blob is zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDesc {
    pub dims: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDesc {
    pub from: String,
    #[serde(default)]
    pub from_port: usize,
    pub to: String,
    #[serde(default)]
    pub to_port: usize,
}

impl TryFrom<NetworkDesc> for Network {
    type Error = NetworkError;

    fn try_from(desc: NetworkDesc) -> Result<Self, Self::Error> {
        let mut network = Network::new(desc.name);

        for layer_desc in desc.layers {
            let mut layer = Layer::new(layer_desc.name, layer_desc.layer_type);
            layer.params = layer_desc.params;
            layer.is_network_input = layer_desc.network_input;
            for port in layer_desc.inputs {
                layer = layer.with_input(port.name, port.shape);
            }
            for port in layer_desc.outputs {
                layer = layer.with_output(port.name, port.shape);
            }
            for (blob_name, blob) in layer_desc.blobs {
                let data = match blob.data {
                    Some(values) => ArrayD::from_shape_vec(IxDyn(&blob.dims), values).map_err(|e| {
                        NetworkError::InvalidBlob {
                            layer: layer.name.clone(),
                            blob: blob_name.clone(),
                            reason: e.to_string(),
                        }
                    })?,
                    None => ArrayD::zeros(IxDyn(&blob.dims)),
                };
                layer.blobs.insert(blob_name, Arc::new(data));
            }
            network.add_layer(layer)?;
        }

        for connection in desc.connections {
            network.connect(&connection.from, connection.from_port, &connection.to, connection.to_port)?;
        }
        Ok(network)
    }
}

impl From<&Network> for NetworkDesc {
    fn from(network: &Network) -> Self {
        let layers = network
            .layers()
            .iter()
            .map(|layer| LayerDesc {
                name: layer.name.clone(),
                layer_type: layer.layer_type.clone(),
                inputs: layer
                    .inputs
                    .iter()
                    .map(|port| PortDesc { name: port.name.clone(), shape: port.shape.clone() })
                    .collect(),
                outputs: layer
                    .outputs
                    .iter()
                    .map(|port| PortDesc { name: port.name.clone(), shape: port.shape.clone() })
                    .collect(),
                params: layer.params.clone(),
                blobs: layer
                    .blobs
                    .iter()
                    .map(|(name, blob)| {
                        let desc = BlobDesc {
                            dims: blob.shape().to_vec(),
                            data: Some(blob.iter().copied().collect()),
                        };
                        (name.clone(), desc)
                    })
                    .collect(),
                network_input: layer.is_network_input,
            })
            .collect();

        let name_of = |port: PortRef| network.layers()[port.layer].name.clone();
        let connections = network
            .connections()
            .iter()
            .map(|connection| ConnectionDesc {
                from: name_of(connection.from),
                from_port: connection.from.port,
                to: name_of(connection.to),
                to_port: connection.to.port,
            })
            .collect();

        NetworkDesc { name: network.name.clone(), layers, connections }
    }
}

impl Network {
    /// Parses a network from its JSON description.
    pub fn from_json_str(json: &str) -> Result<Self, DescError> {
        let desc: NetworkDesc = serde_json::from_str(json)?;
        Ok(Network::try_from(desc)?)
    }

    pub fn to_json_string(&self) -> Result<String, DescError> {
        Ok(serde_json::to_string_pretty(&NetworkDesc::from(self))?)
    }
}
