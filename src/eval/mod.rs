pub mod context;
pub mod decision;
pub mod layer;
pub mod merge;
pub mod reputation;

pub use context::EvalContext;
pub use decision::{Decision, Verdict};
pub use layer::{Check, LayerOutcome};
pub use reputation::{Reputation, UrlChecker, UrlReport};

use std::path::Path;

use crate::error::Error;
use crate::parse::{self, ActionFacts, ActionKind, ShellFacts, Word};
use crate::resolve::is_path_like;
use crate::rules::{RuleRef, RuleSet};

/// One request to judge.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub kind: ActionKind,
    pub input: &'a str,
    pub cwd: &'a Path,
    pub home: &'a Path,
}

/// Verdict for one check after merging layers.
#[derive(Debug, Clone)]
struct CheckResult {
    label: String,
    verdict: Verdict,
    message: String,
    rule: Option<RuleRef>,
}

/// The decision facade: owns the compiled layers for the process lifetime.
#[derive(Debug, Default)]
pub struct Engine {
    layers: Vec<RuleSet>,
    reputation: Option<Reputation>,
}

impl Engine {
    /// Layers may come in any order; they are kept loosest first.
    pub fn new(mut layers: Vec<RuleSet>) -> Self {
        layers.sort_by_key(|l| l.layer);
        Self {
            layers,
            reputation: None,
        }
    }

    pub fn with_reputation(mut self, reputation: Reputation) -> Self {
        self.reputation = Some(reputation);
        self
    }

    /// Judge one request.
    ///
    /// Every check (pipeline stage, path-like argument, file redirect, or
    /// the single path/URL) is evaluated in each layer, merged across
    /// layers, and the most restrictive check decides.
    pub fn decide(&self, request: &Request) -> Result<Decision, Error> {
        let facts = parse::facts_for(request.kind, request.input)?;

        // The most specific layer that sets a search list owns command lookup.
        let search_paths = self
            .layers
            .iter()
            .rev()
            .find_map(|l| l.search_paths.as_deref());
        let ctx = EvalContext::new(
            request.cwd.to_path_buf(),
            request.home.to_path_buf(),
            search_paths,
        );

        let checks = enumerate_checks(&facts);
        if checks.is_empty() {
            return Ok(Decision {
                verdict: Verdict::Allow,
                message: "nothing to run".into(),
                matched_rule: None,
            });
        }

        let mut results: Vec<CheckResult> = checks
            .iter()
            .filter_map(|check| self.judge(check, &ctx))
            .collect();

        if let ActionFacts::Url(url) = &facts
            && let Some(reputation) = &self.reputation
        {
            let report = match reputation.lookup(url) {
                Ok(report) => report,
                Err(reason) => UrlReport {
                    verdict: reputation.fallback.unwrap_or_else(|| self.fetch_default()),
                    reason,
                },
            };
            log::debug!("reputation for {url}: {} ({})", report.verdict, report.reason);
            if report.verdict != Verdict::NoOpinion {
                results.push(CheckResult {
                    label: format!("reputation of {url}"),
                    verdict: report.verdict,
                    message: report.reason,
                    rule: None,
                });
            }
        }

        Ok(combine(results))
    }

    /// Fetch default of the most specific layer that sets one, else ask.
    fn fetch_default(&self) -> Verdict {
        self.layers
            .iter()
            .rev()
            .find_map(|l| l.fetch.default)
            .map_or(Verdict::Ask, Verdict::from)
    }

    /// Merge one check across all layers. `None` when the check is neutral.
    fn judge(&self, check: &Check, ctx: &EvalContext) -> Option<CheckResult> {
        let outcomes: Vec<LayerOutcome> = self
            .layers
            .iter()
            .map(|set| layer::evaluate(check, set, ctx))
            .collect();

        match merge::merge(&outcomes) {
            Some(winner) => Some(CheckResult {
                label: check.describe(),
                verdict: winner.verdict,
                message: winner
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} {}", check.describe(), winner.verdict)),
                rule: winner.rule.clone(),
            }),
            None if check.requires_opinion() => Some(CheckResult {
                label: check.describe(),
                verdict: Verdict::Ask,
                message: format!("no rule covers {}", check.describe()),
                rule: None,
            }),
            None => None,
        }
    }
}

/// Split facts into independently judged checks.
pub fn enumerate_checks(facts: &ActionFacts) -> Vec<Check<'_>> {
    match facts {
        ActionFacts::Shell(shell) => shell_checks(shell),
        ActionFacts::Path { kind, path } => vec![Check::Path { kind: *kind, path }],
        ActionFacts::Url(url) => vec![Check::Url(url)],
    }
}

fn shell_checks(facts: &ShellFacts) -> Vec<Check<'_>> {
    let mut checks = Vec::new();
    for unit in &facts.units {
        for (i, stage) in unit.stages.iter().enumerate() {
            checks.push(Check::Stage {
                stage,
                upstream: &unit.stages[..i],
            });
            for arg in &stage.args {
                if let Word::Literal(path) = arg
                    && is_path_like(path)
                {
                    checks.push(Check::ArgPath { stage, path });
                }
            }
            for redirect in stage.redirects.iter().filter(|r| r.is_file()) {
                checks.push(Check::Redirect { stage, redirect });
            }
        }
    }
    checks
}

/// Most restrictive check wins; the first such check reports.
fn combine(results: Vec<CheckResult>) -> Decision {
    let Some(winner) = results
        .iter()
        .reduce(|best, r| {
            if best.verdict.most_restrictive(r.verdict) == best.verdict {
                best
            } else {
                r
            }
        })
        .cloned()
    else {
        return Decision {
            verdict: Verdict::Allow,
            message: "no checks apply".into(),
            matched_rule: None,
        };
    };

    let message = if results.len() == 1 {
        winner.message
    } else {
        let lines: Vec<String> = results
            .iter()
            .map(|r| {
                let label: String = r.label.chars().take(60).collect();
                format!("  [{label}] -> {}: {}", r.verdict.label(), r.message)
            })
            .collect();
        format!("{}\n{}", winner.message, lines.join("\n"))
    };

    Decision {
        verdict: winner.verdict,
        message,
        matched_rule: winner.rule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::rules::LayerKind;
    use std::sync::Arc;

    fn layer(kind: LayerKind, toml_str: &str) -> RuleSet {
        let config: LayerConfig = toml::from_str(toml_str).unwrap();
        config
            .compile(
                kind,
                Path::new("/nonexistent-base"),
                Path::new("/nonexistent-home"),
                None,
            )
            .unwrap()
    }

    fn decide(engine: &Engine, kind: ActionKind, input: &str) -> Decision {
        engine
            .decide(&Request {
                kind,
                input,
                cwd: Path::new("/nonexistent-base"),
                home: Path::new("/nonexistent-home"),
            })
            .unwrap()
    }

    #[test]
    fn empty_script_is_allowed() {
        let engine = Engine::new(vec![]);
        let d = decide(&engine, ActionKind::Shell, "   ");
        assert_eq!(d.verdict, Verdict::Allow);
    }

    #[test]
    fn unmatched_stage_asks() {
        let engine = Engine::new(vec![layer(LayerKind::Global, "")]);
        let d = decide(&engine, ActionKind::Shell, "frobnicate");
        assert_eq!(d.verdict, Verdict::Ask);
        assert!(d.matched_rule.is_none());
    }

    #[test]
    fn worst_stage_decides_compound() {
        let engine = Engine::new(vec![layer(
            LayerKind::Global,
            r#"
            [[shell.rules]]
            commands = ["ls", "echo"]
            action = "allow"

            [[shell.rules]]
            command = "shred"
            action = "deny"
        "#,
        )]);
        assert_eq!(decide(&engine, ActionKind::Shell, "ls && echo ok").verdict, Verdict::Allow);
        let d = decide(&engine, ActionKind::Shell, "ls && shred x");
        assert_eq!(d.verdict, Verdict::Deny);
        assert_eq!(d.matched_rule.unwrap().to_string(), "global:shell.rules[1]");
    }

    #[test]
    fn arg_path_tightens_stage() {
        let engine = Engine::new(vec![layer(
            LayerKind::Global,
            r#"
            [shell]
            file_rules = true
            [[shell.rules]]
            command = "cat"
            action = "allow"
            [[read.rules]]
            path = "~/.ssh/**"
            action = "deny"
        "#,
        )]);
        assert_eq!(decide(&engine, ActionKind::Shell, "cat ./notes.txt").verdict, Verdict::Allow);
        assert_eq!(decide(&engine, ActionKind::Shell, "cat ~/.ssh/id_rsa").verdict, Verdict::Deny);
    }

    #[test]
    fn unmatched_output_redirect_asks() {
        let engine = Engine::new(vec![layer(
            LayerKind::Global,
            r#"
            [[shell.rules]]
            command = "echo"
            action = "allow"
        "#,
        )]);
        assert_eq!(decide(&engine, ActionKind::Shell, "echo hi 2>&1").verdict, Verdict::Allow);
        assert_eq!(decide(&engine, ActionKind::Shell, "echo hi > out.txt").verdict, Verdict::Ask);
    }

    #[test]
    fn parse_error_propagates() {
        let engine = Engine::new(vec![]);
        let err = engine
            .decide(&Request {
                kind: ActionKind::Shell,
                input: "echo 'unterminated",
                cwd: Path::new("/"),
                home: Path::new("/"),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    struct Blocklist;

    impl UrlChecker for Blocklist {
        fn check(&self, url: &str) -> Result<UrlReport, String> {
            Ok(UrlReport {
                verdict: if url.contains("evil") {
                    Verdict::Deny
                } else {
                    Verdict::NoOpinion
                },
                reason: "blocklist".into(),
            })
        }
    }

    #[test]
    fn reputation_only_tightens() {
        let engine = Engine::new(vec![layer(
            LayerKind::Global,
            r#"
            [fetch]
            default = "allow"
        "#,
        )])
        .with_reputation(Reputation::new(Arc::new(Blocklist)));
        assert_eq!(decide(&engine, ActionKind::Fetch, "https://docs.rs/").verdict, Verdict::Allow);
        assert_eq!(decide(&engine, ActionKind::Fetch, "https://evil.example/").verdict, Verdict::Deny);
    }

    struct Broken;

    impl UrlChecker for Broken {
        fn check(&self, _url: &str) -> Result<UrlReport, String> {
            Err("service unavailable".into())
        }
    }

    #[test]
    fn failed_lookup_degrades_to_fetch_default() {
        let engine = Engine::new(vec![
            layer(LayerKind::Global, "[fetch]\ndefault = \"allow\""),
            layer(LayerKind::Project, "[fetch]\ndefault = \"ask\""),
        ])
        .with_reputation(Reputation::new(Arc::new(Broken)));
        // Layers merge to allow; the failed lookup falls back to the project's ask.
        let d = decide(&engine, ActionKind::Fetch, "https://docs.rs/");
        assert_eq!(d.verdict, Verdict::Ask);
        assert!(d.message.contains("service unavailable"));
    }
}
