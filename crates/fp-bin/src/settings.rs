//! Runner settings file (`framepipe.toml`).
//!
//! Unknown fields are ignored so the file format can grow without breaking
//! older binaries. CLI flags override anything read from disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_SETTINGS_FILE: &str = "framepipe.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    /// Output stream mirrored to the debug display.
    #[serde(default)]
    pub display_stream_id: Option<i32>,
    /// Directory for persisted profiling artifacts.
    #[serde(default)]
    pub profiling_dir: Option<PathBuf>,
    /// Skip input managers even for local graphs with input streams.
    #[serde(default)]
    pub ignore_input_manager: bool,
    #[serde(default)]
    pub graph: GraphSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphSettings {
    /// Path to the prebuilt graph shared library (local mode).
    #[serde(default)]
    pub library: Option<PathBuf>,
    /// Address of the remote graph service (remote mode).
    #[serde(default)]
    pub remote: Option<String>,
}

/// Loads settings from the given path, or from `framepipe.toml` in the
/// working directory when present. A missing default file is not an error.
pub fn load(path: Option<&Path>) -> Result<SettingsFile> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
    };
    if !path.exists() {
        if required {
            anyhow::bail!("settings file not found: {}", path.display());
        }
        return Ok(SettingsFile::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let settings: SettingsFile = toml::from_str(&raw)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    info!(target: "runner.boot", path = %path.display(), "settings_loaded");
    Ok(settings)
}
