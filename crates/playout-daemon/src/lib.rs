//! Playout engine: decides what the LED matrix shows and when.
//!
//! Content is aggregated from audio and fragment sources into one payload
//! per round, the renderer scrolls it, and the next round is prefetched so
//! it is ready when the current one ends.  Playout changes, operator
//! messages and the control surface can preempt a round.

pub mod aggregator;
pub mod core;
pub mod estimator;
pub mod http;
pub mod logging;
pub mod registry;
pub mod renderer;
pub mod scheduler;
pub mod socket;
pub mod sources;
pub mod watchdog;
pub mod zone_control;

/// What the core announces to the observer surfaces.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The published snapshot changed; receivers read it from the
    /// `StateManager`.
    StateUpdated,
    /// A warning or error from anywhere in the daemon.
    Log { error: bool, message: String },
}
