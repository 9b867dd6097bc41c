//! Configuration for the Tandem engine
//!
//! - Generic YAML config loading/saving
//! - Standard config paths
//! - [`EngineConfig`], which sizes the realtime side
//!
//! # Usage
//!
//! ```ignore
//! use tandem_core::config::{default_engine_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_engine_config_path());
//! ```

mod engine;
mod io;
mod paths;

pub use engine::EngineConfig;
pub use io::{load_config, save_config, try_load_config};
pub use paths::{config_dir, default_config_path, default_engine_config_path};
