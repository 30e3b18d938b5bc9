//! Embeddable HTTP request-processing engine.

pub mod app;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod cors;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod middleware;
pub mod multipart;
pub mod respond;
pub mod routing;
mod stream;

pub use app::{App, RPC_MARKER_HEADER};
pub use client::{Client, ClientError, Decoded};
pub use codec::RichValue;
pub use config::EngineConfig;
pub use context::Context;
pub use cors::Cors;
pub use error::{Error, Issue};
pub use lifecycle::Shutdown;
pub use middleware::{Flow, Next};
pub use respond::Payload;
pub use routing::Pattern;
