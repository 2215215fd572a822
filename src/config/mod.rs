//! Configuration loading — JSON schemas for every recognized
//! file role, plus the layered search-path resolution algorithm used to
//! find them at startup and on reload.

mod paths;
mod schema;

pub use paths::{resolve_config_path, ConfigRoots};
pub use schema::{
    ActionConfig, CauseConfig, EventConfig, FanConfig, FaultHandlingConfig, GroupConfig, MonitorConfig,
    MonitorFanConfig, MonitorSensorConfig, PcieCardEntry, PowerOffConfig, ProfileConfig, TrustGroupConfig, ZoneConfig,
};

use std::path::Path;

use crate::error::{ConfigParseError, Error, Result};

/// Parse a JSON file already located by [`resolve_config_path`] into
/// `T`, wrapping serde's error with the file's own path for context.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigParse(ConfigParseError::new(path.display().to_string(), e.to_string()))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| Error::ConfigParse(ConfigParseError::new(path.display().to_string(), e.to_string())))
}
