//! Facts produced by the extractor and consumed by the rule engine.

use std::fmt;

/// The closed set of action kinds the host can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Shell,
    Read,
    Write,
    Edit,
    Glob,
    Grep,
    Fetch,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Shell,
        ActionKind::Read,
        ActionKind::Write,
        ActionKind::Edit,
        ActionKind::Glob,
        ActionKind::Grep,
        ActionKind::Fetch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Shell => "shell",
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Edit => "edit",
            ActionKind::Glob => "glob",
            ActionKind::Grep => "grep",
            ActionKind::Fetch => "fetch",
        }
    }

    /// Parse a kind name as used on the command line and in references.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shell word after reduction.
///
/// `Dynamic` words depend on runtime state (expansions, substitutions).
/// Their text is kept for messages only and never satisfies a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Literal(String),
    Dynamic { display: String },
}

impl Word {
    pub fn literal(&self) -> Option<&str> {
        match self {
            Word::Literal(s) => Some(s),
            Word::Dynamic { .. } => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Word::Dynamic { .. })
    }

    /// Text suitable for messages. Literals are shell-quoted when needed;
    /// a leading `~/` stays bare so the path reads as it would expand.
    pub fn display(&self) -> String {
        match self {
            Word::Literal(s) if s == "~" => s.clone(),
            Word::Literal(s) => match s.strip_prefix("~/") {
                Some(rest) if !rest.is_empty() => format!("~/{}", quote(rest)),
                _ => quote(s),
            },
            Word::Dynamic { display } => display.clone(),
        }
    }
}

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Shell operator joining two pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`: pipe stdout
    Pipe,
    /// `|&`: pipe stdout and stderr
    PipeErr,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::PipeErr => "|&",
        }
    }
}

/// One redirect attached to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Operator as written, e.g. `>`, `>>`, `<`, `&>`, `2>&1` is `>&`.
    pub operator: String,
    /// Target word; `None` for heredocs and `>&-` style closes.
    pub target: Option<Word>,
    /// Explicit descriptor, else 1 for output and 0 for input operators.
    pub fd: u32,
}

impl Redirect {
    pub fn is_output(&self) -> bool {
        matches!(
            self.operator.as_str(),
            ">" | ">>" | "&>" | "&>>" | ">|" | ">&" | ">&-"
        )
    }

    /// `N>&M`, `<&N` and `>&-`: descriptor plumbing, no file involved.
    pub fn is_fd_dup(&self) -> bool {
        match self.operator.as_str() {
            "<&-" | ">&-" => true,
            ">&" | "<&" => match &self.target {
                Some(Word::Literal(t)) => t == "-" || t.chars().all(|c| c.is_ascii_digit()),
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether the target names a file that will be opened.
    pub fn is_file(&self) -> bool {
        !self.is_fd_dup()
            && self.target.is_some()
            && matches!(
                self.operator.as_str(),
                "<" | ">" | ">>" | "&>" | "&>>" | ">|" | ">&" | "<&"
            )
    }

    pub fn describe(&self) -> String {
        let target = self.target.as_ref().map(Word::display).unwrap_or_default();
        format!("redirection ({}) to {}", self.operator, target)
    }
}

/// Facts for one simple command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFacts {
    pub name: Word,
    pub args: Vec<Word>,
    /// Leading `KEY=value` assignments.
    pub assignments: Vec<(String, Word)>,
    pub redirects: Vec<Redirect>,
}

impl CommandFacts {
    pub fn new(name: Word) -> Self {
        Self {
            name,
            args: Vec::new(),
            assignments: Vec::new(),
            redirects: Vec::new(),
        }
    }

    /// Literal command name, if static.
    pub fn name(&self) -> Option<&str> {
        self.name.literal()
    }

    /// Any part of this command is only known at runtime.
    pub fn is_dynamic(&self) -> bool {
        self.name.is_dynamic()
            || self.args.iter().any(Word::is_dynamic)
            || self.assignments.iter().any(|(_, v)| v.is_dynamic())
    }

    pub fn has_assignment(&self, key: &str) -> bool {
        self.assignments.iter().any(|(k, _)| k == key)
    }

    /// Non-option arguments, in order. Everything after `--` counts.
    pub fn positional(&self) -> Vec<&Word> {
        let mut out = Vec::new();
        let mut options_done = false;
        for arg in &self.args {
            match arg.literal() {
                Some("--") if !options_done => options_done = true,
                Some(s) if !options_done && s.starts_with('-') && s.len() > 1 => {}
                _ => out.push(arg),
            }
        }
        out
    }

    /// The command as it would be typed, for messages.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .assignments
            .iter()
            .map(|(k, v)| format!("{k}={}", v.display()))
            .collect();
        parts.push(self.name.display());
        parts.extend(self.args.iter().map(Word::display));
        parts.join(" ")
    }
}

/// Stages connected by pipes, in left-to-right order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<CommandFacts>,
    /// Operators between consecutive stages (`stages.len() - 1` entries
    /// when built from a pipe; empty for a single command).
    pub operators: Vec<Operator>,
}

/// Facts for a whole script: independently evaluated units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellFacts {
    pub units: Vec<Pipeline>,
}

impl ShellFacts {
    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|u| u.stages.is_empty())
    }
}

/// Normalized, rule-matchable form of one requested action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFacts {
    Shell(ShellFacts),
    /// Read, write, edit, glob or grep target.
    Path { kind: ActionKind, path: String },
    Url(String),
}
