//! Path pattern grammar and matching.
//!
//! # Responsibilities
//! - Parse patterns: literal segments, `:name` params, `:name?` optional
//!   params, a trailing `*` wildcard
//! - Extract params positionally; wildcard captures the remainder joined by
//!   `/` under the `"*"` key
//! - Fill a pattern back into a concrete path (safe path building)
//!
//! # Design Decisions
//! - Registration normalizes a trailing slash away (`/foo/` ≡ `/foo`)
//! - An absent optional param binds no key, never an empty string
//! - No regex; segment-wise comparison keeps matching O(segments)

use std::collections::HashMap;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
    OptionalParam(String),
    Wildcard,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Strip a trailing slash, folding `"/foo/"` onto `"/foo"`. The root path is
/// left alone.
pub(crate) fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Pattern {
    pub fn parse(path: &str) -> Pattern {
        let raw = normalize_path(path).to_string();
        let segments = split_segments(&raw)
            .map(|seg| {
                if seg == "*" {
                    Segment::Wildcard
                } else if let Some(name) = seg.strip_prefix(':') {
                    match name.strip_suffix('?') {
                        Some(name) => Segment::OptionalParam(name.to_string()),
                        None => Segment::Param(name.to_string()),
                    }
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Pattern { raw, segments }
    }

    /// The normalized pattern string as registered.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a request path, producing extracted params on success.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_segments(normalize_path(path)).collect();
        let mut params = HashMap::new();
        let mut at = 0;
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(at) != Some(&lit.as_str()) {
                        return None;
                    }
                    at += 1;
                }
                Segment::Param(name) => {
                    let part = parts.get(at)?;
                    params.insert(name.clone(), (*part).to_string());
                    at += 1;
                }
                Segment::OptionalParam(name) => {
                    // Bind only when enough path segments remain for the
                    // required tail of the pattern.
                    let needed = self.min_required_after(i + 1);
                    if parts.len().saturating_sub(at) > needed {
                        if let Some(part) = parts.get(at) {
                            params.insert(name.clone(), (*part).to_string());
                            at += 1;
                        }
                    }
                }
                Segment::Wildcard => {
                    params.insert("*".to_string(), parts[at..].join("/"));
                    at = parts.len();
                }
            }
        }
        (at == parts.len()).then_some(params)
    }

    /// Number of path segments the tail of this pattern requires.
    fn min_required_after(&self, from: usize) -> usize {
        self.segments[from..]
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_) | Segment::Param(_)))
            .count()
    }

    /// Substitute params into the pattern, producing a concrete path.
    /// Absent optional params drop their segment entirely.
    pub fn fill(&self, params: &HashMap<String, String>) -> Result<String, Error> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    out.push('/');
                    out.push_str(lit);
                }
                Segment::Param(name) => {
                    let value = params.get(name).ok_or_else(|| {
                        Error::Internal(format!("missing required path parameter '{name}'"))
                    })?;
                    out.push('/');
                    out.push_str(value);
                }
                Segment::OptionalParam(name) => {
                    if let Some(value) = params.get(name) {
                        out.push('/');
                        out.push_str(value);
                    }
                }
                Segment::Wildcard => {
                    if let Some(rest) = params.get("*") {
                        out.push('/');
                        out.push_str(rest);
                    }
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }

    /// Specificity ordering key: static routes beat param routes beat
    /// wildcards, regardless of registration order.
    pub(crate) fn specificity(&self) -> (usize, usize, isize) {
        let wildcards = self.segments.iter().filter(|s| matches!(s, Segment::Wildcard)).count();
        let params = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_) | Segment::OptionalParam(_)))
            .count();
        let literals =
            self.segments.iter().filter(|s| matches!(s, Segment::Literal(_))).count() as isize;
        (wildcards, params, -literals)
    }
}
