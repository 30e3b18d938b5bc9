//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Per request (tracker.rs):
//!     handle() entered → in-flight count +1 → response produced → -1
//!     wait_until(task) → in-flight count +1 → task settles → -1
//!
//! Shutdown (shutdown.rs):
//!     External signal → trigger → open streams halt → drain in-flight work
//!     → count reaches zero, or deadline elapses, whichever is first
//! ```
//!
//! # Design Decisions
//! - The engine owns no process signal handlers; the embedding adapter
//!   decides when to trigger shutdown
//! - Drain polls on a fixed interval rather than waking per completion

pub mod shutdown;
pub mod tracker;

pub use shutdown::Shutdown;
pub use tracker::{InFlight, InFlightGuard};
