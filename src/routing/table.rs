//! Per-node route registry.
//!
//! # Responsibilities
//! - Store (method, pattern) → handler entries, immutable after registration
//! - Last-wins overwrite for identical method + normalized path
//! - Look up the remaining path after prefix stripping, preferring the most
//!   specific matching pattern
//!
//! # Design Decisions
//! - `method: None` is the all-methods wildcard marker
//! - Static patterns beat param patterns beat wildcards, so a catch-all
//!   registered first never shadows specific routes

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde_json::Value;

use crate::error::Issue;
use crate::respond::{Handler, PayloadFormat};
use crate::routing::pattern::Pattern;

/// A pluggable validation hook. Returns the list of issues found; an empty
/// list means the value passed.
pub trait Validate: Send + Sync {
    fn validate(&self, value: &Value) -> Vec<Issue>;
}

impl<F> Validate for F
where
    F: Fn(&Value) -> Vec<Issue> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Vec<Issue> {
        (self)(value)
    }
}

/// Optional validator hooks attached to a route at registration time.
#[derive(Clone, Default)]
pub struct Schema {
    pub body: Option<Arc<dyn Validate>>,
    pub query: Option<Arc<dyn Validate>>,
    pub params: Option<Arc<dyn Validate>>,
}

/// Per-route registration options.
#[derive(Clone, Default)]
pub struct RouteOptions {
    pub format: PayloadFormat,
    pub schema: Schema,
}

/// One registered route. Immutable after registration.
#[derive(Clone)]
pub(crate) struct RouteEntry {
    /// `None` means the all-methods wildcard.
    pub method: Option<Method>,
    pub pattern: Pattern,
    pub handler: Arc<dyn Handler>,
    pub options: RouteOptions,
}

#[derive(Clone, Default)]
pub(crate) struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn insert(&mut self, entry: RouteEntry) {
        let existing = self
            .entries
            .iter()
            .position(|e| e.method == entry.method && e.pattern.raw() == entry.pattern.raw());
        match existing {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
    }

    /// Look up `path` for `method`. A `HEAD` request with no explicit entry
    /// falls back to the matching `GET` entry.
    pub fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&RouteEntry, HashMap<String, String>, bool)> {
        if let Some(hit) = self.lookup_exact(method, path) {
            return Some((hit.0, hit.1, false));
        }
        if *method == Method::HEAD {
            if let Some(hit) = self.lookup_exact(&Method::GET, path) {
                return Some((hit.0, hit.1, true));
            }
        }
        None
    }

    fn lookup_exact(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&RouteEntry, HashMap<String, String>)> {
        self.entries
            .iter()
            .filter(|e| e.method.as_ref().map_or(true, |m| m == method))
            .filter_map(|e| e.pattern.matches(path).map(|params| (e, params)))
            .min_by_key(|(e, _)| e.pattern.specificity())
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respond::Payload;
    use crate::RichValue;

    fn entry(method: Option<Method>, path: &str) -> RouteEntry {
        RouteEntry {
            method,
            pattern: Pattern::parse(path),
            handler: Arc::new(|_cx: crate::Context| async { RichValue::Null }),
            options: RouteOptions::default(),
        }
    }

    #[test]
    fn last_wins_on_identical_method_and_path() {
        let mut table = RouteTable::default();
        table.insert(entry(Some(Method::GET), "/a"));
        table.insert(entry(Some(Method::GET), "/a/"));
        assert_eq!(table.entries().len(), 1);
    }

    #[test]
    fn all_methods_marker_matches_any_method() {
        let mut table = RouteTable::default();
        table.insert(entry(None, "/x"));
        assert!(table.lookup(&Method::DELETE, "/x").is_some());
        assert!(table.lookup(&Method::POST, "/x").is_some());
    }

    #[test]
    fn head_falls_back_to_get() {
        let mut table = RouteTable::default();
        table.insert(entry(Some(Method::GET), "/page"));
        let (_, _, fallback) = table.lookup(&Method::HEAD, "/page").unwrap();
        assert!(fallback);
    }

    #[test]
    fn specific_route_beats_catch_all_registered_first() {
        let mut table = RouteTable::default();
        table.insert(entry(Some(Method::GET), "/*"));
        table.insert(entry(Some(Method::GET), "/users/:id"));
        table.insert(entry(Some(Method::GET), "/users/me"));
        let (hit, _, _) = table.lookup(&Method::GET, "/users/me").unwrap();
        assert_eq!(hit.pattern.raw(), "/users/me");
        let (hit, params, _) = table.lookup(&Method::GET, "/users/7").unwrap();
        assert_eq!(hit.pattern.raw(), "/users/:id");
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        let (hit, _, _) = table.lookup(&Method::GET, "/other/path").unwrap();
        assert_eq!(hit.pattern.raw(), "/*");
    }

    #[test]
    fn payload_stream_variant_exists() {
        // Compile-time sanity that streaming payloads are constructible.
        let _ = Payload::stream(futures_util::stream::empty());
    }
}
