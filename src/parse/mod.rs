pub mod shell;
pub mod types;

pub use shell::extract;
pub use types::{
    ActionFacts, ActionKind, CommandFacts, Operator, Pipeline, Redirect, ShellFacts, Word,
};

use crate::error::ParseError;

/// Reduce a raw request of the given kind to facts.
///
/// Only shell input is parsed; every other kind carries its string as-is.
pub fn facts_for(kind: ActionKind, raw: &str) -> Result<ActionFacts, ParseError> {
    Ok(match kind {
        ActionKind::Shell => ActionFacts::Shell(extract(raw)?),
        ActionKind::Fetch => ActionFacts::Url(raw.trim().to_string()),
        ActionKind::Read
        | ActionKind::Write
        | ActionKind::Edit
        | ActionKind::Glob
        | ActionKind::Grep => ActionFacts::Path {
            kind,
            path: raw.to_string(),
        },
    })
}
