//! gatepost: a layered policy engine that judges agent actions.
//!
//! A request (a shell command line, a file path to read, write, edit or
//! search, or a URL to fetch) is reduced to facts, matched against
//! specificity-ranked rules in every configuration layer, and merged into
//! one of [`eval::Verdict::Allow`], [`eval::Verdict::Ask`] or
//! [`eval::Verdict::Deny`]. Shell input is parsed with tree-sitter-bash;
//! paths and command names are resolved through symlinks before matching.
//!
//! # Architecture
//!
//! - **[`parse`]**: tree-sitter-bash fact extraction and the fact types.
//! - **[`resolve`]**: path canonicalization and command lookup.
//! - **[`rules`]**: patterns, rule compilation, specificity.
//! - **[`eval`]**: per-layer evaluation, layer merge, the [`eval::Engine`] facade.
//! - **[`config`]**: layer discovery, embedded defaults, overlay merge.
//! - **[`logging`]**: file logger setup and the per-decision log line.

/// Configuration types, layer discovery, and overlay merge logic.
pub mod config;
/// Error types for malformed input and configuration.
pub mod error;
/// Evaluation engine: checks, layers, merge, decisions.
pub mod eval;
/// File logger and decision records.
pub mod logging;
/// Shell parsing and fact types.
pub mod parse;
/// Path and command resolution.
pub mod resolve;
/// Compiled rules, patterns, and specificity.
pub mod rules;

use std::path::Path;

pub use error::{ConfigError, Error, ParseError};
pub use eval::{Decision, Engine, Request, Verdict};
pub use parse::ActionKind;
pub use rules::{LayerKind, RuleSet};

/// Judge one request against already loaded layers.
///
/// Convenience wrapper around [`Engine::decide`] for tests and one-off
/// use; long-lived callers should keep an [`Engine`].
pub fn decide(
    kind: ActionKind,
    raw: &str,
    layers: &[RuleSet],
    cwd: &Path,
    home: &Path,
) -> Result<Decision, Error> {
    let engine = Engine::new(layers.to_vec());
    engine.decide(&Request {
        kind,
        input: raw,
        cwd,
        home,
    })
}
