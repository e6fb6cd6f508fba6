//! Evaluation of one check against one layer.

use crate::parse::{ActionKind, CommandFacts, Redirect};
use crate::resolve::basename;
use crate::rules::{Pattern, PathRules, Rule, RuleAction, RuleRef, RuleSet, select};

use super::context::EvalContext;
use super::decision::Verdict;

/// One independently judged part of a request.
#[derive(Debug, Clone, Copy)]
pub enum Check<'f> {
    /// A pipeline stage, with the stages piped into it.
    Stage {
        stage: &'f CommandFacts,
        upstream: &'f [CommandFacts],
    },
    /// A path-like literal argument, judged as a read.
    ArgPath {
        stage: &'f CommandFacts,
        path: &'f str,
    },
    /// A file redirect of a stage.
    Redirect {
        stage: &'f CommandFacts,
        redirect: &'f Redirect,
    },
    Path { kind: ActionKind, path: &'f str },
    Url(&'f str),
}

impl Check<'_> {
    pub fn describe(&self) -> String {
        match self {
            Check::Stage { stage, .. } => format!("`{}`", stage.display()),
            Check::ArgPath { stage, path } => {
                format!("argument {path} of `{}`", stage.display())
            }
            Check::Redirect { stage, redirect } => {
                format!("{} in `{}`", redirect.describe(), stage.display())
            }
            Check::Path { kind, path } => format!("{kind} {path}"),
            Check::Url(url) => format!("fetch {url}"),
        }
    }

    /// Whether a merged [`Verdict::NoOpinion`] must become a question.
    ///
    /// Argument paths and input redirects only ever tighten the verdict of
    /// their stage.
    pub fn requires_opinion(&self) -> bool {
        match self {
            Check::Stage { .. } | Check::Path { .. } | Check::Url(_) => true,
            Check::ArgPath { .. } => false,
            Check::Redirect { redirect, .. } => redirect.is_output(),
        }
    }
}

/// What one layer says about one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutcome {
    pub layer: crate::rules::LayerKind,
    pub verdict: Verdict,
    pub message: Option<String>,
    pub rule: Option<RuleRef>,
}

impl LayerOutcome {
    fn none(set: &RuleSet) -> Self {
        Self {
            layer: set.layer,
            verdict: Verdict::NoOpinion,
            message: None,
            rule: None,
        }
    }

    fn from_rule(set: &RuleSet, rule: &Rule, check: &Check) -> Self {
        let verdict = Verdict::from(rule.action);
        let message = rule
            .message
            .clone()
            .unwrap_or_else(|| format!("{} {verdict} by {}", check.describe(), rule.origin));
        Self {
            layer: set.layer,
            verdict,
            message: Some(message),
            rule: Some(rule.origin.clone()),
        }
    }

    fn from_default(set: &RuleSet, default: Option<RuleAction>, check: &Check) -> Self {
        match default {
            Some(action) => {
                let verdict = Verdict::from(action);
                Self {
                    layer: set.layer,
                    verdict,
                    message: Some(format!(
                        "{} {verdict} by {} default",
                        check.describe(),
                        set.layer
                    )),
                    rule: None,
                }
            }
            None => Self::none(set),
        }
    }
}

/// Evaluate `check` against the rules of a single layer.
pub fn evaluate(check: &Check, set: &RuleSet, ctx: &EvalContext) -> LayerOutcome {
    let outcome = match check {
        Check::Stage { stage, upstream } => stage_outcome(check, stage, upstream, set, ctx),
        Check::ArgPath { path, .. } => {
            if set.shell.file_rules {
                path_outcome(check, path, &set.read, None, set, ctx)
            } else {
                LayerOutcome::none(set)
            }
        }
        Check::Redirect { redirect, .. } => redirect_outcome(check, redirect, set, ctx),
        Check::Path { kind, path } => {
            let section = path_section(set, *kind);
            let outcome = path_outcome(check, path, section, section.default, set, ctx);
            if matches!(kind, ActionKind::Glob | ActionKind::Grep) {
                search_outcome(check, path, section, outcome, set, ctx)
            } else {
                outcome
            }
        }
        Check::Url(url) => path_outcome(check, url, &set.fetch, set.fetch.default, set, ctx),
    };
    log::debug!(
        "{} layer: {} -> {}{}",
        set.layer,
        check.describe(),
        outcome.verdict,
        outcome
            .rule
            .as_ref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default()
    );
    outcome
}

/// Section consulted for a non-shell kind, honoring `use_read_rules`.
fn path_section(set: &RuleSet, kind: ActionKind) -> &PathRules {
    match set.section(kind) {
        Some(section) if section.use_read_rules => &set.read,
        Some(section) => section,
        None => &set.read,
    }
}

fn path_outcome(
    check: &Check,
    candidate: &str,
    section: &PathRules,
    default: Option<RuleAction>,
    set: &RuleSet,
    ctx: &EvalContext,
) -> LayerOutcome {
    let best = select(section.rules.iter().filter(|rule| {
        rule.subject
            .as_ref()
            .is_some_and(|p| p.matches(candidate, ctx, &set.refs))
    }));
    match best {
        Some(rule) => LayerOutcome::from_rule(set, rule, check),
        None => LayerOutcome::from_default(set, default, check),
    }
}

/// A recursive search is judged by its root, but it also reaches every
/// denied subject below that root. Such a search asks instead of allowing.
fn search_outcome(
    check: &Check,
    target: &str,
    section: &PathRules,
    outcome: LayerOutcome,
    set: &RuleSet,
    ctx: &EvalContext,
) -> LayerOutcome {
    if matches!(outcome.verdict, Verdict::Deny | Verdict::Ask) {
        return outcome;
    }
    let root = ctx.canonical(&search_root(target));
    let reached = section.rules.iter().find_map(|rule| {
        let subject = rule.subject.as_ref()?;
        (rule.action == RuleAction::Deny && subject.confined_below(&root, &set.refs))
            .then_some((rule, subject))
    });
    match reached {
        Some((rule, subject)) => LayerOutcome {
            layer: set.layer,
            verdict: Verdict::Ask,
            message: Some(format!(
                "{} reaches denied {} ({})",
                check.describe(),
                subject.describe(),
                rule.origin
            )),
            rule: Some(rule.origin.clone()),
        },
        None => outcome,
    }
}

/// Literal leading directories of a search target: `~/src/**/*.rs` is
/// rooted at `~/src`.
fn search_root(target: &str) -> String {
    let literal: Vec<&str> = target
        .split('/')
        .take_while(|part| !part.contains(['*', '?', '[', '{']))
        .collect();
    match literal.join("/") {
        root if root.is_empty() && target.starts_with('/') => "/".to_string(),
        root if root.is_empty() => ".".to_string(),
        root => root,
    }
}

fn stage_outcome(
    check: &Check,
    stage: &CommandFacts,
    upstream: &[CommandFacts],
    set: &RuleSet,
    ctx: &EvalContext,
) -> LayerOutcome {
    let best = select(
        set.shell
            .rules
            .iter()
            .filter(|rule| stage_matches(rule, stage, upstream, set, ctx)),
    );
    let mut outcome = match best {
        Some(rule) => LayerOutcome::from_rule(set, rule, check),
        None => LayerOutcome::from_default(set, set.shell.default, check),
    };

    if stage.is_dynamic() && outcome.verdict == Verdict::Allow {
        let capped = Verdict::from(set.shell.dynamic_arguments);
        if capped != Verdict::Allow {
            outcome.verdict = capped;
            outcome.message = Some(format!(
                "{} has arguments only known at runtime",
                check.describe()
            ));
        }
    }
    outcome
}

fn stage_matches(
    rule: &Rule,
    stage: &CommandFacts,
    upstream: &[CommandFacts],
    set: &RuleSet,
    ctx: &EvalContext,
) -> bool {
    if let Some(command) = &rule.command {
        match stage.name() {
            Some(name) if ctx.resolver().same_command(command, name) => {}
            _ => return false,
        }
    }

    let c = &rule.conditions;
    if c.max_args.is_some_and(|max| stage.args.len() > max) {
        return false;
    }

    let literal_args: Vec<&str> = stage.args.iter().filter_map(|w| w.literal()).collect();
    if !c
        .args
        .iter()
        .all(|p| literal_args.iter().any(|a| p.matches(a, ctx, &set.refs)))
    {
        return false;
    }

    if !c.positional.is_empty() {
        let positional = stage.positional();
        let ok = c.positional.iter().enumerate().all(|(i, p)| {
            positional
                .get(i)
                .and_then(|w| w.literal())
                .is_some_and(|a| p.matches(a, ctx, &set.refs))
        });
        if !ok {
            return false;
        }
    }

    if !c.pipe_from.is_empty() {
        let piped = upstream.iter().filter_map(CommandFacts::name).any(|name| {
            c.pipe_from
                .iter()
                .any(|p| command_name_matches(p, name, set, ctx))
        });
        if !piped {
            return false;
        }
    }

    if !c.redirect.is_empty() {
        let redirected = stage
            .redirects
            .iter()
            .filter(|r| r.is_file())
            .filter_map(|r| r.target.as_ref().and_then(|t| t.literal()))
            .any(|target| c.redirect.iter().any(|p| p.matches(target, ctx, &set.refs)));
        if !redirected {
            return false;
        }
    }

    c.env.iter().all(|var| stage.has_assignment(var))
}

/// Pipe-source patterns name commands: literals go through the resolver,
/// other kinds see both the name as written and its basename.
fn command_name_matches(pattern: &Pattern, name: &str, set: &RuleSet, ctx: &EvalContext) -> bool {
    match pattern {
        Pattern::Literal(expected) => ctx.resolver().same_command(expected, name),
        Pattern::Ref { id, .. } => set
            .refs
            .entry(*id)
            .iter()
            .any(|p| command_name_matches(p, name, set, ctx)),
        other => {
            other.matches(name, ctx, &set.refs) || other.matches(basename(name), ctx, &set.refs)
        }
    }
}

fn redirect_outcome(
    check: &Check,
    redirect: &Redirect,
    set: &RuleSet,
    ctx: &EvalContext,
) -> LayerOutcome {
    let Some(target) = redirect.target.as_ref().and_then(|t| t.literal()) else {
        return LayerOutcome::none(set);
    };

    let best = select(set.shell.redirects.iter().filter(|rule| {
        let operator_ok = rule.conditions.operators.is_empty()
            || rule.conditions.operators.contains(&redirect.operator);
        operator_ok
            && rule
                .subject
                .as_ref()
                .is_some_and(|p| p.matches(target, ctx, &set.refs))
    }));
    let from_redirects = match best {
        Some(rule) => LayerOutcome::from_rule(set, rule, check),
        None => LayerOutcome::none(set),
    };

    if !set.shell.file_rules {
        return from_redirects;
    }
    let section = if redirect.is_output() {
        &set.write
    } else {
        &set.read
    };
    let from_files = path_outcome(check, target, section, None, set, ctx);

    if from_redirects.verdict.most_restrictive(from_files.verdict) == from_redirects.verdict {
        from_redirects
    } else {
        from_files
    }
}
