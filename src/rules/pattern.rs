//! Typed patterns and the cross-reference table.
//!
//! Written in configuration as strings with an optional kind prefix:
//!
//! | prefix  | kind                                    |
//! |---------|-----------------------------------------|
//! | `lit:`  | exact string equality                   |
//! | `glob:` | glob over the canonicalized path        |
//! | `re:`   | regex over the raw string               |
//! | `flag:` | short option inside a `-abc` bundle     |
//! | `ref:`  | any pattern of another named list       |
//!
//! Unprefixed strings take the default of their [`PatternContext`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::error::ConfigError;
use crate::eval::EvalContext;
use crate::resolve::{canonicalize_lenient, expand_template, lexical_normalize};

use super::compile::PatternEnv;

/// Where a pattern is written, which decides its default kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternContext {
    /// Command arguments: literal by default.
    Argument,
    /// Command names (`pipe_from`): literal by default, compared to the
    /// basename too.
    Name,
    /// Filesystem paths and redirect targets: path glob by default.
    Path,
    /// URLs: glob over the raw string by default.
    Url,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(String),
    Glob {
        source: String,
        matcher: GlobMatcher,
        /// Match against the canonicalized candidate (paths) or the raw
        /// string (URLs).
        canonical: bool,
        /// Leading literal path components, for precision.
        depth: u32,
        /// Real path every match lies under; `None` for URL and any-depth
        /// globs.
        root: Option<PathBuf>,
    },
    Regex(Regex),
    /// Short option letter, e.g. `r` matches `-rf`.
    Flag(char),
    /// Index into the owning layer's [`RefTable`].
    Ref { name: String, id: usize },
}

impl Pattern {
    pub fn matches(&self, candidate: &str, ctx: &EvalContext, refs: &RefTable) -> bool {
        match self {
            Pattern::Literal(s) => candidate == s,
            Pattern::Glob {
                matcher, canonical, ..
            } => {
                if *canonical {
                    matcher.is_match(ctx.canonical(candidate))
                } else {
                    matcher.is_match(candidate)
                }
            }
            Pattern::Regex(re) => re.is_match(candidate),
            Pattern::Flag(letter) => is_flag_bundle(candidate) && candidate[1..].contains(*letter),
            Pattern::Ref { id, .. } => refs
                .entry(*id)
                .iter()
                .any(|p| p.matches(candidate, ctx, refs)),
        }
    }

    /// Small bonus ranking how narrowly the pattern pins its candidate.
    /// Always below [`super::CONDITION_SCORE`].
    pub fn precision(&self) -> u32 {
        match self {
            Pattern::Literal(_) => 40,
            Pattern::Glob { depth, .. } => (*depth).min(30),
            Pattern::Flag(_) => 20,
            Pattern::Ref { .. } => 10,
            Pattern::Regex(_) => 5,
        }
    }

    /// Whether every match lies inside `dir`, so a recursive search of
    /// `dir` can reach it.
    pub fn confined_below(&self, dir: &Path, refs: &RefTable) -> bool {
        match self {
            Pattern::Glob {
                root: Some(root), ..
            } => root.starts_with(dir),
            Pattern::Ref { id, .. } => refs.entry(*id).iter().any(|p| p.confined_below(dir, refs)),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Pattern::Literal(s) => s.clone(),
            Pattern::Glob { source, .. } => source.clone(),
            Pattern::Regex(re) => format!("re:{}", re.as_str()),
            Pattern::Flag(c) => format!("flag:{c}"),
            Pattern::Ref { name, .. } => format!("ref:{name}"),
        }
    }
}

/// `-abc`, but not `--long`, `-` or `-1`.
fn is_flag_bundle(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('-') else {
        return false;
    };
    !rest.is_empty()
        && !rest.starts_with('-')
        && rest.chars().all(|c| c.is_ascii_alphanumeric())
        && rest.chars().any(|c| c.is_ascii_alphabetic())
}

enum Spec<'a> {
    Literal(&'a str),
    Glob(&'a str),
    Regex(&'a str),
    Flag(&'a str),
    Ref(&'a str),
}

fn split_spec(raw: &str, context: PatternContext) -> Spec<'_> {
    if let Some(rest) = raw.strip_prefix("lit:") {
        Spec::Literal(rest)
    } else if let Some(rest) = raw.strip_prefix("glob:") {
        Spec::Glob(rest)
    } else if let Some(rest) = raw.strip_prefix("re:") {
        Spec::Regex(rest)
    } else if let Some(rest) = raw.strip_prefix("flag:") {
        Spec::Flag(rest)
    } else if let Some(rest) = raw.strip_prefix("ref:") {
        Spec::Ref(rest)
    } else {
        match context {
            PatternContext::Argument | PatternContext::Name => Spec::Literal(raw),
            PatternContext::Path | PatternContext::Url => Spec::Glob(raw),
        }
    }
}

/// Name of the list a `ref:` spec points at, if it is one.
pub fn reference_name(raw: &str) -> Option<&str> {
    raw.strip_prefix("ref:")
}

fn invalid(raw: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidPattern {
        pattern: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Compile one pattern; `ref:` specs are looked up in `refs`.
pub fn compile(
    raw: &str,
    context: PatternContext,
    env: &PatternEnv,
    refs: &RefTable,
) -> Result<Pattern, ConfigError> {
    match split_spec(raw, context) {
        Spec::Ref(name) => refs
            .id(name)
            .map(|id| Pattern::Ref {
                name: name.to_string(),
                id,
            })
            .ok_or_else(|| ConfigError::UnknownReference {
                name: name.to_string(),
            }),
        _ => compile_leaf(raw, context, env),
    }
}

/// Compile a non-reference pattern.
fn compile_leaf(raw: &str, context: PatternContext, env: &PatternEnv) -> Result<Pattern, ConfigError> {
    match split_spec(raw, context) {
        Spec::Literal(s) => Ok(Pattern::Literal(s.to_string())),
        Spec::Regex(re) => Regex::new(re).map(Pattern::Regex).map_err(|e| invalid(raw, e)),
        Spec::Flag(f) => {
            let mut chars = f.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Ok(Pattern::Flag(c)),
                _ => Err(invalid(raw, "flag patterns name exactly one option letter")),
            }
        }
        Spec::Glob(g) if context == PatternContext::Url => {
            let matcher = GlobBuilder::new(g)
                .build()
                .map_err(|e| invalid(raw, e))?
                .compile_matcher();
            Ok(Pattern::Glob {
                source: raw.to_string(),
                matcher,
                canonical: false,
                depth: 0,
                root: None,
            })
        }
        Spec::Glob(g) => {
            let (pattern, depth, root) = path_glob(g, env).map_err(|reason| invalid(raw, reason))?;
            let matcher = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| invalid(raw, e))?
                .compile_matcher();
            Ok(Pattern::Glob {
                source: raw.to_string(),
                matcher,
                canonical: true,
                depth,
                root,
            })
        }
        Spec::Ref(name) => Err(ConfigError::UnknownReference {
            name: name.to_string(),
        }),
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Turn a configured path glob into an absolute glob over real paths.
///
/// `~` and `$VAR` expand; slash-free patterns match at any depth; relative
/// patterns anchor at the layer's base directory; the literal prefix is
/// canonicalized so it lines up with canonicalized candidates.
fn path_glob(raw: &str, env: &PatternEnv) -> Result<(String, u32, Option<PathBuf>), String> {
    let expanded = expand_template(raw, env.home)?;

    if !expanded.contains('/') {
        return Ok((format!("**/{expanded}"), 0, None));
    }

    let absolute = if expanded.starts_with('/') {
        PathBuf::from(&expanded)
    } else {
        env.base_dir.join(&expanded)
    };

    let mut prefix = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();
    for component in absolute.components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !has_glob_meta(&text) {
            prefix.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }

    let depth = prefix
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count() as u32;
    let real_prefix = canonicalize_lenient(&lexical_normalize(&prefix));
    let mut pattern = real_prefix.to_string_lossy().into_owned();
    for part in &rest {
        if !pattern.ends_with('/') {
            pattern.push('/');
        }
        pattern.push_str(part);
    }
    Ok((pattern, depth, Some(real_prefix)))
}

/// A named list to expose through `ref:`.
#[derive(Debug, Clone)]
pub struct RefSource {
    pub context: PatternContext,
    pub specs: Vec<String>,
}

/// Flat, cycle-checked table of named pattern lists.
///
/// Entries never contain [`Pattern::Ref`]: references are inlined at build
/// time, so matching never recurses through names and never loops.
#[derive(Debug, Clone, Default)]
pub struct RefTable {
    index: HashMap<String, usize>,
    entries: Vec<Vec<Pattern>>,
}

enum Visit {
    InProgress,
    Done(usize),
}

impl RefTable {
    pub fn id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn entry(&self, id: usize) -> &[Pattern] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten every source, failing on unknown names and cycles.
    pub fn build(sources: &BTreeMap<String, RefSource>, env: &PatternEnv) -> Result<Self, ConfigError> {
        let mut table = RefTable::default();
        let mut state = HashMap::new();
        for name in sources.keys() {
            let mut stack = Vec::new();
            table.flatten(name, sources, env, &mut state, &mut stack)?;
        }
        Ok(table)
    }

    fn flatten(
        &mut self,
        name: &str,
        sources: &BTreeMap<String, RefSource>,
        env: &PatternEnv,
        state: &mut HashMap<String, Visit>,
        stack: &mut Vec<String>,
    ) -> Result<usize, ConfigError> {
        match state.get(name) {
            Some(Visit::Done(id)) => return Ok(*id),
            Some(Visit::InProgress) => {
                let start = stack.iter().position(|n| n == name).unwrap_or(0);
                let mut chain = stack[start..].to_vec();
                chain.push(name.to_string());
                return Err(ConfigError::CyclicReference { chain });
            }
            None => {}
        }
        let source = sources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownReference {
                name: name.to_string(),
            })?;

        state.insert(name.to_string(), Visit::InProgress);
        stack.push(name.to_string());

        let mut flat = Vec::new();
        for spec in &source.specs {
            match reference_name(spec) {
                Some(target) => {
                    let id = self.flatten(target, sources, env, state, stack)?;
                    flat.extend(self.entries[id].iter().cloned());
                }
                None => flat.push(compile_leaf(spec, source.context, env)?),
            }
        }

        stack.pop();
        let id = self.entries.len();
        self.entries.push(flat);
        self.index.insert(name.to_string(), id);
        state.insert(name.to_string(), Visit::Done(id));
        Ok(id)
    }
}
