//! Standard locations for Tandem configuration files

use std::path::PathBuf;

/// Directory holding Tandem configuration
///
/// Returns the platform config dir joined with `tandem`
/// (e.g. `~/.config/tandem` on Linux), or `./tandem` when the platform
/// reports none.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
}

/// Default path of a config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}

/// Default engine configuration file
pub fn default_engine_config_path() -> PathBuf {
    default_config_path("engine.yaml")
}
