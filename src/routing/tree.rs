//! Composition tree compilation and request matching.
//!
//! # Data Flow
//! ```text
//! Compilation (first handle call):
//!     App tree
//!     → breadth-first walk assigning arena ids
//!     → effective prefixes (collapsing overlapping child prefixes)
//!     → per-node scope lists (ancestor chain ∪ scoped:false nodes)
//!     → frozen as immutable CompiledTree
//!
//! Matching (per request):
//!     normalized path
//!     → breadth-first node scan, skipping tables behind non-matching prefixes
//!     → first table hit wins; otherwise synthetic not-found bound to the
//!       nearest node
//! ```
//!
//! # Design Decisions
//! - Node identity is an arena index, not a runtime counter
//! - Scope membership is a pure function of tree shape; precomputed once
//! - Ties between equally-deep candidates resolve by breadth-first visit order

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde_json::{Map, Value};

use crate::app::App;
use crate::error::ErrorHandler;
use crate::middleware::Middleware;
use crate::routing::pattern::normalize_path;
use crate::routing::table::{RouteEntry, RouteTable};

pub(crate) struct CompiledNode {
    /// Effective path prefix, normalized; empty for an unprefixed root.
    pub prefix: String,
    pub scoped: bool,
    /// Effective plain-JSON flag: set on this node or any ancestor.
    pub plain_json_unless_rpc: bool,
    pub table: RouteTable,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub error_handlers: Vec<Arc<dyn ErrorHandler>>,
    /// Default state template merged along the ancestor chain.
    pub state: Map<String, Value>,
    /// Scope membership in global breadth-first order.
    pub scope: Vec<usize>,
}

pub(crate) struct CompiledTree {
    pub nodes: Vec<CompiledNode>,
}

pub(crate) enum MatchOutcome<'t> {
    Found {
        node: usize,
        entry: &'t RouteEntry,
        params: HashMap<String, String>,
        head_fallback: bool,
    },
    NotFound {
        nearest: usize,
    },
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl CompiledTree {
    pub fn compile(root: &App) -> Self {
        let mut nodes: Vec<CompiledNode> = Vec::new();
        let mut ancestors: Vec<Vec<usize>> = Vec::new();
        // Breadth-first queue of (app, parent id).
        let mut queue: Vec<(&App, Option<usize>)> = vec![(root, None)];
        let mut at = 0;
        while at < queue.len() {
            let (app, parent) = queue[at];
            let id = nodes.len();
            let (prefix, plain_json, state, chain) = match parent {
                None => (
                    normalize_prefix(&app.prefix),
                    app.plain_json_unless_rpc,
                    app.state.clone(),
                    vec![id],
                ),
                Some(p) => {
                    let parent_node = &nodes[p];
                    let own = normalize_prefix(&app.prefix);
                    // Collapse a child prefix that already contains the
                    // accumulated prefix as an initial substring.
                    let prefix = if !parent_node.prefix.is_empty()
                        && own.starts_with(parent_node.prefix.as_str())
                    {
                        own
                    } else {
                        format!("{}{}", parent_node.prefix, own)
                    };
                    let mut state = parent_node.state.clone();
                    for (k, v) in &app.state {
                        state.insert(k.clone(), v.clone());
                    }
                    let mut chain = ancestors[p].clone();
                    chain.push(id);
                    (
                        prefix,
                        parent_node.plain_json_unless_rpc || app.plain_json_unless_rpc,
                        state,
                        chain,
                    )
                }
            };
            nodes.push(CompiledNode {
                prefix,
                scoped: app.scoped,
                plain_json_unless_rpc: plain_json,
                table: app.routes.clone(),
                middleware: app.middleware.clone(),
                error_handlers: app.error_handlers.clone(),
                state,
                scope: Vec::new(),
            });
            ancestors.push(chain);
            for child in &app.children {
                queue.push((child, Some(id)));
            }
            at += 1;
        }
        // Scope lists: ancestor chain plus every scoped:false node, in one
        // global breadth-first ordering (ascending arena id).
        for id in 0..nodes.len() {
            let scope: Vec<usize> = (0..nodes.len())
                .filter(|i| ancestors[id].contains(i) || !nodes[*i].scoped)
                .collect();
            nodes[id].scope = scope;
        }
        CompiledTree { nodes }
    }

    pub fn match_request(&self, method: &Method, path: &str) -> MatchOutcome<'_> {
        let path = normalize_path(path);
        let mut nearest = 0usize;
        let mut nearest_len = 0usize;
        for (id, node) in self.nodes.iter().enumerate() {
            if !prefix_matches(&node.prefix, path) {
                // Children may still carry a fuller prefix; keep walking.
                continue;
            }
            if node.prefix.len() > nearest_len {
                nearest = id;
                nearest_len = node.prefix.len();
            }
            if node.table.is_empty() {
                continue;
            }
            let rest = &path[node.prefix.len()..];
            let rest = if rest.is_empty() { "/" } else { rest };
            if let Some((entry, params, head_fallback)) = node.table.lookup(method, rest) {
                return MatchOutcome::Found { node: id, entry, params, head_fallback };
            }
        }
        MatchOutcome::NotFound { nearest }
    }

    /// Middleware applicable to a match on `node`, flattened in scope order.
    pub fn scoped_middleware(&self, node: usize) -> Vec<Arc<dyn Middleware>> {
        self.nodes[node]
            .scope
            .iter()
            .flat_map(|&i| self.nodes[i].middleware.iter().cloned())
            .collect()
    }

    /// Error handlers applicable to a match on `node`, in scope order.
    pub fn scoped_error_handlers(&self, node: usize) -> Vec<Arc<dyn ErrorHandler>> {
        self.nodes[node]
            .scope
            .iter()
            .flat_map(|&i| self.nodes[i].error_handlers.iter().cloned())
            .collect()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        return String::new();
    }
    normalize_path(prefix).to_string()
}
