//! Engine error types
//!
//! Every control-plane call returns [`EngineResult`]. Errors are grouped into
//! four classes by [`EngineError::kind`] so callers can decide whether to
//! fix their input, free resources, or just surface a device problem.

use thiserror::Error;

use crate::audio::DeviceError;
use crate::types::{CollaboratorId, EffectId, TrackId};

/// Error class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected before any state changed
    Validation,
    /// A fixed budget is exhausted; free something first
    ResourceLimit,
    /// Audio I/O is unavailable
    Device,
    /// A DSP unit misbehaved while processing
    RuntimeProcessing,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Effect not found: {0}")]
    EffectNotFound(EffectId),

    #[error("Collaborator not found: {0}")]
    CollaboratorNotFound(CollaboratorId),

    #[error("Automation lane not found: {0}")]
    AutomationNotFound(u64),

    #[error("Unknown effect kind: {0:?}")]
    UnknownEffectKind(String),

    #[error("Effect {kind} has no parameter {name:?}")]
    UnknownParameter { kind: &'static str, name: String },

    #[error("Parameter {name} = {value} is outside [{min}, {max}]")]
    ParameterOutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Automation curve is empty or not finite")]
    InvalidCurve,

    #[error("Track {0} has no input connected")]
    NoInputConnected(TrackId),

    #[error("Input channel {0} is not available")]
    InvalidInputRoute(usize),

    #[error("Cannot {action} while transport is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Effect budget exhausted ({limit} effects)")]
    ChainFull { limit: usize },

    #[error("Track limit reached ({limit} tracks)")]
    TooManyTracks { limit: usize },

    #[error("Automation lane limit reached ({limit} lanes)")]
    AutomationLimit { limit: usize },

    #[error("Collaborator limit reached ({limit} inputs)")]
    TooManyCollaborators { limit: usize },

    #[error("Realtime command queue is full")]
    QueueFull,

    #[error("Recording is unavailable: {0}")]
    RecordingUnavailable(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Effect {effect} produced non-finite output")]
    EffectFaulted { effect: EffectId },
}

impl EngineError {
    /// Error class for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TrackNotFound(_)
            | EngineError::EffectNotFound(_)
            | EngineError::CollaboratorNotFound(_)
            | EngineError::AutomationNotFound(_)
            | EngineError::UnknownEffectKind(_)
            | EngineError::UnknownParameter { .. }
            | EngineError::ParameterOutOfRange { .. }
            | EngineError::InvalidCurve
            | EngineError::NoInputConnected(_)
            | EngineError::InvalidInputRoute(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::InvalidConfig(_) => ErrorKind::Validation,
            EngineError::ChainFull { .. }
            | EngineError::TooManyTracks { .. }
            | EngineError::AutomationLimit { .. }
            | EngineError::TooManyCollaborators { .. }
            | EngineError::QueueFull => ErrorKind::ResourceLimit,
            EngineError::RecordingUnavailable(_) | EngineError::Device(_) => ErrorKind::Device,
            EngineError::EffectFaulted { .. } => ErrorKind::RuntimeProcessing,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
