//! RT-safe garbage collection for realtime-owned memory
//!
//! This module provides a global `basedrop` collector. Everything handed to
//! the audio thread (effect units, automation lanes, clip audio, capture
//! rings, mix snapshots) is wrapped in `Owned<T>` or `Shared<T>`. When one of
//! those is dropped on the audio thread the pointer is only enqueued; the
//! memory is released later on the collector thread.
//!
//! ## Usage
//!
//! ```ignore
//! use basedrop::Owned;
//! use crate::engine::gc::gc_handle;
//!
//! let unit = Owned::new(&gc_handle(), EffectUnit::new(kind, 44_100.0, &values));
//! // Dropping `unit` on the audio thread defers the free to "audio-gc"
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Global handle for creating `Owned<T>`/`Shared<T>` allocations
///
/// The collector itself lives on a dedicated thread.
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Interval between collection passes
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn the collector thread and return a handle to it
///
/// Falls back to a collector owned by the calling thread's lifetime only if
/// the thread cannot be spawned, which leaks deferred drops instead of
/// aborting.
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it is created on the thread that runs it
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            log::error!("Failed to start audio GC thread, deferred drops will leak");
            let collector = Collector::new();
            let handle = collector.handle();
            std::mem::forget(collector);
            handle
        }
    }
}

/// Get a handle for creating deferred-drop allocations
///
/// Lightweight and cloneable; call it on the control thread only.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::{Owned, Shared};

    #[test]
    fn test_handle_is_shared() {
        let a = Shared::new(&gc_handle(), vec![1.0_f32; 16]);
        let b = a.clone();
        assert_eq!(b.len(), 16);
        drop(a);
        drop(b);

        let owned = Owned::new(&gc_handle(), [0u8; 64]);
        assert_eq!(owned.len(), 64);
    }
}
