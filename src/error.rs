//! Error taxonomy.
//!
//! Only malformed input ([`ParseError`]) and malformed configuration
//! ([`ConfigError`]) are errors. An unresolvable command or path is ordinary
//! data, and a failed reputation lookup degrades to a verdict.

use std::path::PathBuf;

/// The shell parser rejected the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("shell syntax error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    /// 1-based line of the first offending node.
    pub line: usize,
    /// 1-based column of the first offending node.
    pub column: usize,
}

/// A configuration layer could not be loaded or compiled.
///
/// Raised eagerly at load time; a bad rule aborts the whole layer.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("reference to unknown pattern list `{name}`")]
    UnknownReference { name: String },
    #[error("cyclic pattern reference: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },
    #[error("invalid rule {section}[{index}]: {reason}")]
    InvalidRule {
        section: String,
        index: usize,
        reason: String,
    },
}

/// Anything that prevents a decision from being made.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Process exit status for errors; distinct from every verdict's code.
    pub const EXIT_CODE: i32 = 3;
}
