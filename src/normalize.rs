//! Recovers a canonical relative field path from a raw `select` expression.
//!
//! Stylesheets reference form data through expressions like
//! `$FormData/Address[1]/CityNm` or `$FormData/TotalAmt * -1`. There is no grammar to lean on,
//! so [`HeuristicNormalizer`] peels predicates, function suffixes and trailing operators off the
//! expression. Callers go through [`PathNormalizer`] so a real expression parser can replace the
//! heuristics later.

use regex::Regex;
use std::sync::LazyLock;

static FUNCTION_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(text|count|number|string)\(\)$").unwrap());

const WILDCARD_STEP: &str = "child::*";

pub trait PathNormalizer: Send + Sync {
    /// Returns the path relative to `$<bound_var>/`, or `None` when the expression is not a
    /// concrete reference through that variable.
    fn normalize(&self, select: &str, bound_var: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicNormalizer;

impl PathNormalizer for HeuristicNormalizer {
    fn normalize(&self, select: &str, bound_var: &str) -> Option<String> {
        normalize(select, bound_var)
    }
}

pub fn normalize(select: &str, bound_var: &str) -> Option<String> {
    let prefix = format!("${bound_var}/");
    let raw = select.strip_prefix(prefix.as_str())?;

    let without_predicates = strip_predicates(raw);
    let without_function = FUNCTION_SUFFIX_RE.replace(&without_predicates, "");
    let before_operator = truncate_at_operator(&without_function);
    let path = before_operator.trim().trim_start_matches('@');

    if path.is_empty() || path.starts_with('$') || has_wildcard_step(path) {
        return None;
    }
    Some(path.to_string())
}

/// Drops every `[...]` segment, nested brackets included. An unclosed `[` drops the rest.
fn strip_predicates(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Cuts the expression at the first arithmetic or comparison operator.
/// A `*` that begins a location step is a name test, not multiplication.
fn truncate_at_operator(raw: &str) -> &str {
    for (idx, ch) in raw.char_indices() {
        let is_operator = match ch {
            '+' | '=' | '<' | '>' | '!' => true,
            '*' => !starts_step(&raw[..idx]),
            _ => false,
        };
        if is_operator {
            return &raw[..idx];
        }
    }
    raw
}

fn starts_step(before: &str) -> bool {
    before.is_empty() || before.ends_with('/') || before.ends_with("::") || before.ends_with('@')
}

fn has_wildcard_step(path: &str) -> bool {
    path == WILDCARD_STEP
        || path
            .split('/')
            .any(|step| step == "*" || step.ends_with("::*") || step == "@*")
}
