use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the runner should cache downloaded model weights between loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Keep weights in the runner's durable cache across restarts.
    #[default]
    Durable,
    /// Re-fetch weights on every load.
    None,
}

/// Fixed per-call generation parameters. These are configuration, not
/// user-exposed knobs during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    pub context_window: u32,
    pub cache_mode: CacheMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: 1024,
            context_window: 4096,
            cache_mode: CacheMode::Durable,
        }
    }
}

/// Resolve the per-device data directory holding the session database.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "quillchat")
        .context("could not determine a per-user data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Default location of the session database inside [`data_dir`].
pub fn default_db_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("sessions.db"))
}
