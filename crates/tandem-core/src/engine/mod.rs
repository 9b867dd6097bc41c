//! Audio engine - control plane, realtime processor and the seam between them
//!
//! The engine is split across two threads that never share a lock:
//! - [`Engine`]: the control side. Owns tracks, chains, automation and the
//!   transport, validates every request, and publishes mix snapshots.
//! - [`BlockProcessor`]: the realtime side. Renders one block at a time from
//!   the current snapshot and the effects it owns.
//!
//! Commands travel to the processor over an SPSC ring, reports travel back
//! over another, and meters are plain atomics. Anything the processor drops
//! is handed to the collector thread (see [`gc`]).

mod automation;
mod chain;
mod collab;
mod command;
mod engine;
mod events;
pub mod gc;
mod meters;
mod monitor;
mod processor;
mod snapshot;
mod strip;
mod track;
mod transport;

pub use automation::*;
pub use chain::*;
pub use collab::*;
pub use command::*;
pub use engine::*;
pub use events::*;
pub use meters::*;
pub use monitor::*;
pub use processor::*;
pub use snapshot::*;
pub use strip::*;
pub use track::*;
pub use transport::*;
