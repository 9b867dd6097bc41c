//! Tandem Core - realtime multi-track engine for collaborative recording

pub mod audio;
pub mod clip;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use types::*;
