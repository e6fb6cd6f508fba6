//! Filesystem-facing resolution: paths to their real locations and
//! command names to the binaries they would run.

pub mod command;
pub mod path;

pub use command::{CommandResolver, Resolution, basename, is_builtin};
pub use path::{canonicalize_lenient, expand_template, is_path_like, lexical_normalize, resolve_path};
