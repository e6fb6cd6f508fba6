//! Compile a parsed [`LayerConfig`] into an immutable [`RuleSet`].
//!
//! All patterns are compiled and every reference is resolved here, so a bad
//! rule fails the load instead of surfacing during evaluation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{FetchSection, LayerConfig, PathSection, ShellSection};
use crate::error::ConfigError;
use crate::parse::ActionKind;

use super::pattern::{self, PatternContext, RefSource, RefTable};
use super::{Conditions, LayerKind, PathRules, Rule, RuleAction, RuleRef, RuleSet, ShellRules};

/// Filesystem anchors for path patterns of one layer.
#[derive(Debug, Clone, Copy)]
pub struct PatternEnv<'a> {
    /// Expansion of `~` and `$HOME`.
    pub home: &'a Path,
    /// Anchor for relative path patterns: the project root for project
    /// layers, the working directory otherwise.
    pub base_dir: &'a Path,
}

pub fn compile_layer(
    layer: LayerKind,
    config: &LayerConfig,
    env: &PatternEnv,
    source: Option<PathBuf>,
) -> Result<RuleSet, ConfigError> {
    let refs = RefTable::build(&ref_sources(config), env)?;
    let c = Compiler {
        layer,
        env,
        refs: &refs,
        fallback: config.settings.default,
    };

    let shell = c.shell(&config.shell)?;
    let read = c.paths(ActionKind::Read, &config.read)?;
    let write = c.paths(ActionKind::Write, &config.write)?;
    let edit = c.paths(ActionKind::Edit, &config.edit)?;
    let glob = c.paths(ActionKind::Glob, &config.glob)?;
    let grep = c.paths(ActionKind::Grep, &config.grep)?;
    let fetch = c.fetch(&config.fetch)?;

    log::debug!(
        "compiled {layer} layer: {} shell, {} redirect, {} path, {} url rules, {} references",
        shell.rules.len(),
        shell.redirects.len(),
        read.rules.len() + write.rules.len() + edit.rules.len() + glob.rules.len() + grep.rules.len(),
        fetch.rules.len(),
        refs.len(),
    );

    Ok(RuleSet {
        layer,
        source,
        shell,
        read,
        write,
        edit,
        glob,
        grep,
        fetch,
        refs,
        search_paths: config.shell.search_paths.clone(),
    })
}

/// Named lists visible to `ref:`.
///
/// Implicit `<kind>.<action>` lists come first; a `[patterns]` entry of the
/// same name shadows them. `[patterns]` entries are literal unless prefixed.
fn ref_sources(config: &LayerConfig) -> BTreeMap<String, RefSource> {
    let mut sources = BTreeMap::new();
    for action in [RuleAction::Allow, RuleAction::Ask, RuleAction::Deny] {
        let mut add = |kind: ActionKind, context: PatternContext, specs: Vec<String>| {
            sources.insert(
                format!("{kind}.{}", action.as_str()),
                RefSource { context, specs },
            );
        };

        add(
            ActionKind::Shell,
            PatternContext::Name,
            config
                .shell
                .rules
                .iter()
                .filter(|r| r.action == action)
                .flat_map(|r| r.command.iter().chain(&r.commands).cloned())
                .collect(),
        );
        for (kind, section) in [
            (ActionKind::Read, &config.read),
            (ActionKind::Write, &config.write),
            (ActionKind::Edit, &config.edit),
            (ActionKind::Glob, &config.glob),
            (ActionKind::Grep, &config.grep),
        ] {
            add(
                kind,
                PatternContext::Path,
                section
                    .rules
                    .iter()
                    .filter(|r| r.action == action)
                    .map(|r| r.path.clone())
                    .collect(),
            );
        }
        add(
            ActionKind::Fetch,
            PatternContext::Url,
            config
                .fetch
                .rules
                .iter()
                .filter(|r| r.action == action)
                .map(|r| r.url.clone())
                .collect(),
        );
    }
    for (name, specs) in &config.patterns {
        sources.insert(
            name.clone(),
            RefSource {
                context: PatternContext::Argument,
                specs: specs.clone(),
            },
        );
    }
    sources
}

struct Compiler<'a> {
    layer: LayerKind,
    env: &'a PatternEnv<'a>,
    refs: &'a RefTable,
    fallback: Option<RuleAction>,
}

impl Compiler<'_> {
    fn origin(&self, section: &str, index: usize) -> RuleRef {
        RuleRef {
            layer: self.layer,
            section: section.to_string(),
            index,
        }
    }

    fn patterns(
        &self,
        specs: &[String],
        context: PatternContext,
    ) -> Result<Vec<pattern::Pattern>, ConfigError> {
        specs
            .iter()
            .map(|s| pattern::compile(s, context, self.env, self.refs))
            .collect()
    }

    fn shell(&self, section: &ShellSection) -> Result<ShellRules, ConfigError> {
        const RULES: &str = "shell.rules";
        const REDIRECTS: &str = "shell.redirects";

        let mut rules = Vec::new();
        for (index, cfg) in section.rules.iter().enumerate() {
            let invalid = |reason: &str| ConfigError::InvalidRule {
                section: RULES.into(),
                index,
                reason: reason.into(),
            };
            if cfg.env.iter().any(|v| v.is_empty() || v.contains('=')) {
                return Err(invalid("env entries are variable names"));
            }
            let conditions = Conditions {
                args: self.patterns(&cfg.args, PatternContext::Argument)?,
                positional: self.patterns(&cfg.positional, PatternContext::Argument)?,
                pipe_from: self.patterns(&cfg.pipe_from, PatternContext::Name)?,
                redirect: self.patterns(&cfg.redirect, PatternContext::Path)?,
                env: cfg.env.clone(),
                operators: Vec::new(),
                max_args: cfg.max_args,
            };

            let names: Vec<&String> = cfg.command.iter().chain(&cfg.commands).collect();
            if names.iter().any(|n| n.is_empty()) {
                return Err(invalid("command names cannot be empty"));
            }
            if names.is_empty() {
                if conditions.count() == 0 {
                    return Err(invalid("rule needs a command or at least one condition"));
                }
                rules.push(Rule::new(
                    self.origin(RULES, index),
                    cfg.action,
                    None,
                    None,
                    conditions,
                    cfg.message.clone(),
                ));
                continue;
            }
            for name in names {
                rules.push(Rule::new(
                    self.origin(RULES, index),
                    cfg.action,
                    Some(name.clone()),
                    None,
                    conditions.clone(),
                    cfg.message.clone(),
                ));
            }
        }

        let mut redirects = Vec::new();
        for (index, cfg) in section.redirects.iter().enumerate() {
            if cfg.operators.iter().any(String::is_empty) {
                return Err(ConfigError::InvalidRule {
                    section: REDIRECTS.into(),
                    index,
                    reason: "operators cannot be empty".into(),
                });
            }
            let subject = pattern::compile(&cfg.target, PatternContext::Path, self.env, self.refs)?;
            let conditions = Conditions {
                operators: cfg.operators.clone(),
                ..Default::default()
            };
            redirects.push(Rule::new(
                self.origin(REDIRECTS, index),
                cfg.action,
                None,
                Some(subject),
                conditions,
                cfg.message.clone(),
            ));
        }

        Ok(ShellRules {
            rules,
            redirects,
            default: section.default.or(self.fallback),
            file_rules: section.file_rules.unwrap_or(false),
            dynamic_arguments: section.dynamic_arguments.unwrap_or(RuleAction::Ask),
        })
    }

    fn paths(&self, kind: ActionKind, section: &PathSection) -> Result<PathRules, ConfigError> {
        let name = format!("{kind}.rules");
        let use_read_rules = section.use_read_rules.unwrap_or(false);
        if use_read_rules && !matches!(kind, ActionKind::Glob | ActionKind::Grep) {
            return Err(ConfigError::InvalidRule {
                section: kind.to_string(),
                index: 0,
                reason: "use_read_rules only applies to glob and grep".into(),
            });
        }

        let rules = section
            .rules
            .iter()
            .enumerate()
            .map(|(index, cfg)| -> Result<Rule, ConfigError> {
                let subject = pattern::compile(&cfg.path, PatternContext::Path, self.env, self.refs)?;
                Ok(Rule::new(
                    self.origin(&name, index),
                    cfg.action,
                    None,
                    Some(subject),
                    Conditions::default(),
                    cfg.message.clone(),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PathRules {
            rules,
            default: section.default.or(self.fallback),
            use_read_rules,
        })
    }

    fn fetch(&self, section: &FetchSection) -> Result<PathRules, ConfigError> {
        let rules = section
            .rules
            .iter()
            .enumerate()
            .map(|(index, cfg)| -> Result<Rule, ConfigError> {
                let subject = pattern::compile(&cfg.url, PatternContext::Url, self.env, self.refs)?;
                Ok(Rule::new(
                    self.origin("fetch.rules", index),
                    cfg.action,
                    None,
                    Some(subject),
                    Conditions::default(),
                    cfg.message.clone(),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PathRules {
            rules,
            default: section.default.or(self.fallback),
            use_read_rules: false,
        })
    }
}
