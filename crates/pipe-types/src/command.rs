//! Client command families.
//!
//! Both families cross the client boundary as opaque byte payloads; the
//! encoding is JSON with externally tagged variants so a transport binding
//! can forward them without understanding their content.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilingMode {
    #[default]
    Disabled,
    Latency,
    TraceEvents,
}

/// Incremental configuration choices, applied while the runner is in the
/// reset phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationCommand {
    SetInputSource { source_id: i32 },
    SetOutputStream { stream_id: i32, max_in_flight: u32 },
    SetOffload { offload_id: i32 },
    SetTermination { termination_id: i32 },
    SetProfileOptions { mode: ProfilingMode },
}

/// Lifecycle and debug requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    ApplyConfigs,
    ResetConfigs,
    StartGraph,
    StopGraph,
    DeathNotification,
    StartPipeProfile,
    StopPipeProfile,
    ReadDebugData,
    ReleaseDebugger,
}

impl ConfigurationCommand {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|_| Error::InvalidArgument)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Internal)
    }
}

impl ControlCommand {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|_| Error::InvalidArgument)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Internal)
    }
}
