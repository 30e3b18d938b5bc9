//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (call time):
//!     method + path pattern + handler
//!     → pattern.rs (parse, normalize trailing slash)
//!     → table.rs (per-node registry, last-wins overwrite)
//!
//! Request (per call):
//!     tree.rs (breadth-first walk over compiled arena)
//!     → table lookup on the prefix-stripped remainder
//!     → matched entry + extracted params, or nearest-node not-found
//! ```
//!
//! # Design Decisions
//! - Tree compiled on first handle call, immutable afterwards
//! - Deterministic: same input always matches same route
//! - Within a node, pattern specificity decides; across nodes, breadth-first
//!   visit order decides

pub mod pattern;
pub mod table;
pub(crate) mod tree;

pub use pattern::Pattern;
pub use table::{RouteOptions, Schema, Validate};
