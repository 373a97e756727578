//! Profiling artifact handling.
//!
//! When the client asks for debug data the engine fetches the graph's blob
//! and pushes it here. The debugger persists it under
//! `<profiling_dir>/<graph_name>` via a temp file and an atomic rename, and
//! lets a reader block briefly for data that is still in flight.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use pipe_types::{Error, Result};
use tracing::{error, info};

/// Upper bound on how long a reader waits for in-flight profiling data.
pub const PROFILING_READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingArtifact {
    pub data: Vec<u8>,
    pub path: PathBuf,
}

pub struct Debugger {
    profiling_dir: PathBuf,
    graph_name: String,
    data: Mutex<Option<Vec<u8>>>,
    available: Condvar,
}

impl Debugger {
    pub fn new(profiling_dir: PathBuf, graph_name: String) -> Self {
        Self {
            profiling_dir,
            graph_name,
            data: Mutex::new(None),
            available: Condvar::new(),
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.profiling_dir.join(&self.graph_name)
    }

    /// Stores the blob, persists it on disk, and wakes any waiting reader.
    /// The on-disk copy is replaced atomically; a crash mid-write leaves the
    /// previous artifact intact.
    pub fn deliver(&self, data: &[u8]) -> Result {
        self.persist(data)?;
        let mut slot = self.data.lock().map_err(|_| Error::Internal)?;
        *slot = Some(data.to_vec());
        self.available.notify_all();
        Ok(())
    }

    fn persist(&self, data: &[u8]) -> Result {
        fs::create_dir_all(&self.profiling_dir).map_err(|e| {
            error!(target: "client.debugger", error = %e, "profiling_dir_creation_failed");
            Error::Internal
        })?;
        let final_path = self.artifact_path();
        let tmp_path = self.profiling_dir.join(format!(".{}.tmp", self.graph_name));
        let mut file = fs::File::create(&tmp_path).map_err(|_| Error::Internal)?;
        file.write_all(data).map_err(|_| Error::Internal)?;
        file.sync_all().map_err(|_| Error::Internal)?;
        fs::rename(&tmp_path, &final_path).map_err(|e| {
            error!(target: "client.debugger", error = %e, "artifact_rename_failed");
            Error::Internal
        })?;
        info!(
            target: "client.debugger",
            path = %final_path.display(),
            size = data.len(),
            "profiling_artifact_written"
        );
        Ok(())
    }

    /// Takes the pending blob, waiting up to [`PROFILING_READ_TIMEOUT`] for
    /// one to arrive. The wait is a strict upper bound, not a retry loop.
    pub fn take(&self) -> Result<ProfilingArtifact> {
        let mut slot = self.data.lock().map_err(|_| Error::Internal)?;
        if slot.is_none() {
            let (guard, timeout) = self
                .available
                .wait_timeout(slot, PROFILING_READ_TIMEOUT)
                .map_err(|_| Error::Internal)?;
            slot = guard;
            if timeout.timed_out() && slot.is_none() {
                return Err(Error::Internal);
            }
        }
        match slot.take() {
            Some(data) => Ok(ProfilingArtifact {
                data,
                path: self.artifact_path(),
            }),
            None => Err(Error::Internal),
        }
    }

    /// Drops any pending blob; used when the client releases the debugger.
    pub fn release(&self) {
        if let Ok(mut slot) = self.data.lock() {
            *slot = None;
        }
    }
}
