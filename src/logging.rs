//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for embedding applications and tests
//! - Default filter targets this crate; `RUST_LOG` overrides
//!
//! # Design Decisions
//! - Library code only emits `tracing` events; installing a subscriber is
//!   the embedder's choice, this helper is a convenience

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a formatted subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
