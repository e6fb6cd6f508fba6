//! Compiled, immutable rules and the specificity ranking between them.

pub mod compile;
pub mod pattern;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parse::ActionKind;
pub use pattern::{Pattern, PatternContext, RefTable};

/// Independently evaluated configuration source, loosest first.
///
/// The order doubles as message precedence when merging: later layers are
/// more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Global,
    Project,
    Local,
    Session,
    Explicit,
}

impl LayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Global => "global",
            LayerKind::Project => "project",
            LayerKind::Local => "local",
            LayerKind::Session => "session",
            LayerKind::Explicit => "explicit",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule (or a layer default) says to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Ask,
    Deny,
}

impl RuleAction {
    /// Tie-break rank among equally specific rules: deny > allow > ask.
    pub fn priority(self) -> u8 {
        match self {
            RuleAction::Deny => 2,
            RuleAction::Allow => 1,
            RuleAction::Ask => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Ask => "ask",
            RuleAction::Deny => "deny",
        }
    }
}

/// Where a rule was declared: `project:shell.rules[3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleRef {
    pub layer: LayerKind,
    pub section: String,
    pub index: usize,
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.layer, self.section, self.index)
    }
}

/// Score for pinning the command name or the rule subject.
pub const NAME_SCORE: u32 = 100;
/// Score for every additional condition. The summed precision bonus stays
/// below it.
pub const CONDITION_SCORE: u32 = 100;

/// Conditions beyond the command name, all of which must hold.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub args: Vec<Pattern>,
    pub positional: Vec<Pattern>,
    pub pipe_from: Vec<Pattern>,
    pub redirect: Vec<Pattern>,
    pub env: Vec<String>,
    pub operators: Vec<String>,
    pub max_args: Option<usize>,
}

impl Conditions {
    /// Independent conditions this set pins down.
    pub fn count(&self) -> usize {
        self.args.len()
            + self.positional.len()
            + usize::from(!self.pipe_from.is_empty())
            + usize::from(!self.redirect.is_empty())
            + self.env.len()
            + usize::from(!self.operators.is_empty())
            + usize::from(self.max_args.is_some())
    }

    fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.args
            .iter()
            .chain(&self.positional)
            .chain(&self.pipe_from)
            .chain(&self.redirect)
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub origin: RuleRef,
    pub action: RuleAction,
    /// Command name for shell rules.
    pub command: Option<String>,
    /// Path, URL or redirect target for the other rule lists.
    pub subject: Option<Pattern>,
    pub conditions: Conditions,
    pub message: Option<String>,
    /// Fixed at load.
    pub specificity: u32,
}

impl Rule {
    pub fn new(
        origin: RuleRef,
        action: RuleAction,
        command: Option<String>,
        subject: Option<Pattern>,
        conditions: Conditions,
        message: Option<String>,
    ) -> Self {
        let specificity = specificity(command.is_some(), subject.as_ref(), &conditions);
        Self {
            origin,
            action,
            command,
            subject,
            conditions,
            message,
            specificity,
        }
    }

    /// Ordering key: higher specificity first, then deny > allow > ask.
    pub fn rank(&self) -> (u32, u8) {
        (self.specificity, self.action.priority())
    }
}

/// Monotonic in the set of conditions: adding any condition adds at least
/// [`CONDITION_SCORE`], so a strict superset always scores higher.
pub fn specificity(pins_name: bool, subject: Option<&Pattern>, conditions: &Conditions) -> u32 {
    let base = if pins_name || subject.is_some() {
        NAME_SCORE
    } else {
        0
    };
    let precision: u32 = subject
        .into_iter()
        .chain(conditions.patterns())
        .map(Pattern::precision)
        .sum();
    // Precision only breaks ties between equal condition counts.
    base + CONDITION_SCORE * conditions.count() as u32 + precision.min(CONDITION_SCORE - 1)
}

/// Pick the best of the matching rules.
///
/// Among equal ranks the earliest declared rule wins; it only affects
/// which message is reported since the action is equal too.
pub fn select<'r>(matching: impl Iterator<Item = &'r Rule>) -> Option<&'r Rule> {
    let mut best: Option<&Rule> = None;
    for rule in matching {
        if best.is_none_or(|b| rule.rank() > b.rank()) {
            best = Some(rule);
        }
    }
    best
}

/// Shell section of one layer.
#[derive(Debug, Clone)]
pub struct ShellRules {
    pub rules: Vec<Rule>,
    pub redirects: Vec<Rule>,
    pub default: Option<RuleAction>,
    pub file_rules: bool,
    pub dynamic_arguments: RuleAction,
}

/// Path or URL section of one layer.
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    pub rules: Vec<Rule>,
    pub default: Option<RuleAction>,
    /// Glob/grep only: evaluate against the read section instead.
    pub use_read_rules: bool,
}

/// One layer's complete, immutable rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub layer: LayerKind,
    /// File the layer was loaded from, if any.
    pub source: Option<PathBuf>,
    pub shell: ShellRules,
    pub read: PathRules,
    pub write: PathRules,
    pub edit: PathRules,
    pub glob: PathRules,
    pub grep: PathRules,
    pub fetch: PathRules,
    pub refs: RefTable,
    pub search_paths: Option<Vec<String>>,
}

impl RuleSet {
    /// The section for a non-shell kind.
    pub fn section(&self, kind: ActionKind) -> Option<&PathRules> {
        match kind {
            ActionKind::Shell => None,
            ActionKind::Read => Some(&self.read),
            ActionKind::Write => Some(&self.write),
            ActionKind::Edit => Some(&self.edit),
            ActionKind::Glob => Some(&self.glob),
            ActionKind::Grep => Some(&self.grep),
            ActionKind::Fetch => Some(&self.fetch),
        }
    }
}
