//! Graph options descriptor.
//!
//! Advertised by a graph (local library or remote service) and used by the
//! engine to validate client selections. Serialized form is the opaque bytes
//! exchanged at graph and client boundaries.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::packet::{PacketType, PixelFormat};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphOptions {
    pub graph_name: String,
    #[serde(default)]
    pub input_configs: Vec<InputConfig>,
    #[serde(default)]
    pub output_configs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub config_id: i32,
    pub input_streams: Vec<InputStreamConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStreamConfig {
    pub stream_id: i32,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub source: InputStreamSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStreamSource {
    Camera { camera_id: String },
    ImageFiles { paths: Vec<String> },
    VideoFile { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub stream_id: i32,
    pub stream_name: String,
    pub packet_type: PacketType,
}

impl GraphOptions {
    pub fn output_config(&self, stream_id: i32) -> Option<&OutputConfig> {
        self.output_configs
            .iter()
            .find(|c| c.stream_id == stream_id)
    }

    pub fn input_config(&self, config_id: i32) -> Option<&InputConfig> {
        self.input_configs.iter().find(|c| c.config_id == config_id)
    }

    pub fn serialized(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Internal)
    }

    pub fn from_serialized(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|_| Error::InvalidArgument)
    }
}
