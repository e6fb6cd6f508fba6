use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::compile::{PatternEnv, compile_layer};
use crate::rules::{LayerKind, RuleAction, RuleSet};

/// Embedded default configuration; the base of the global layer.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

/// Directory name used for per-project policy files.
pub const PROJECT_DIR: &str = ".gatepost";
/// Environment variable naming a session policy file.
pub const SESSION_ENV: &str = "GATEPOST_SESSION";

// ── Layer file schema ──

/// One configuration layer as written in TOML.
///
/// The same shape serves as an overlay: scalar `Option`s override, rule
/// lists extend unless the section sets `replace = true`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub settings: Settings,
    /// Named pattern lists, reachable from any pattern as `ref:<name>`.
    #[serde(default)]
    pub patterns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub read: PathSection,
    #[serde(default)]
    pub write: PathSection,
    #[serde(default)]
    pub edit: PathSection,
    #[serde(default)]
    pub glob: PathSection,
    #[serde(default)]
    pub grep: PathSection,
    #[serde(default)]
    pub fetch: FetchSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    /// Verdict for any kind whose section sets no default of its own.
    pub default: Option<RuleAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ShellSection {
    #[serde(default)]
    pub replace: bool,
    pub default: Option<RuleAction>,
    /// Check path-like arguments and redirect targets against the
    /// read/write rules of the same layer.
    pub file_rules: Option<bool>,
    /// Cap applied to an `allow` when the command has runtime-only words.
    pub dynamic_arguments: Option<RuleAction>,
    /// Ordered directories for command lookup; `$VAR` and `~` expand.
    pub search_paths: Option<Vec<String>>,
    #[serde(default)]
    pub rules: Vec<ShellRuleConfig>,
    #[serde(default)]
    pub redirects: Vec<RedirectRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ShellRuleConfig {
    pub action: RuleAction,
    pub command: Option<String>,
    /// Shorthand for one rule per name with identical conditions.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Each pattern must match some argument.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pattern `i` must match the `i`-th non-option argument.
    #[serde(default)]
    pub positional: Vec<String>,
    /// Some upstream pipeline stage must be one of these commands.
    #[serde(default)]
    pub pipe_from: Vec<String>,
    /// Some redirect target must match one of these patterns.
    #[serde(default)]
    pub redirect: Vec<String>,
    /// Each variable must be assigned in the command prefix.
    #[serde(default)]
    pub env: Vec<String>,
    /// The command may carry at most this many arguments.
    pub max_args: Option<usize>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedirectRuleConfig {
    pub action: RuleAction,
    pub target: String,
    /// Restrict to these operators (`>`, `>>`, `<`, …). Empty means any.
    #[serde(default)]
    pub operators: Vec<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PathSection {
    #[serde(default)]
    pub replace: bool,
    pub default: Option<RuleAction>,
    /// Search kinds only: reuse the read rules and default wholesale.
    pub use_read_rules: Option<bool>,
    #[serde(default)]
    pub rules: Vec<PathRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PathRuleConfig {
    pub action: RuleAction,
    pub path: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FetchSection {
    #[serde(default)]
    pub replace: bool,
    pub default: Option<RuleAction>,
    #[serde(default)]
    pub rules: Vec<UrlRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UrlRuleConfig {
    pub action: RuleAction,
    pub url: String,
    pub message: Option<String>,
}

// ── Merge logic ──

/// Merge an overlay list into a base list.
/// In replace mode the overlay replaces the base entirely; otherwise
/// new items are appended, skipping duplicates.
fn merge_list<T: PartialEq>(base: &mut Vec<T>, add: Vec<T>, replace: bool) {
    if replace {
        *base = add;
    } else {
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

fn merge_scalar<T>(base: &mut Option<T>, overlay: Option<T>) {
    if overlay.is_some() {
        *base = overlay;
    }
}

fn merge_paths(base: &mut PathSection, overlay: PathSection) {
    merge_scalar(&mut base.default, overlay.default);
    merge_scalar(&mut base.use_read_rules, overlay.use_read_rules);
    merge_list(&mut base.rules, overlay.rules, overlay.replace);
}

impl LayerConfig {
    /// The embedded default configuration.
    pub fn default_config() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Parse a layer file. A missing file is `Ok(None)`.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Apply an overlay on top of this config (merge semantics).
    pub fn apply_overlay(&mut self, overlay: LayerConfig) {
        merge_scalar(&mut self.settings.default, overlay.settings.default);

        // Named pattern lists: an overlay entry replaces the whole list.
        self.patterns.extend(overlay.patterns);

        let s = overlay.shell;
        merge_scalar(&mut self.shell.default, s.default);
        merge_scalar(&mut self.shell.file_rules, s.file_rules);
        merge_scalar(&mut self.shell.dynamic_arguments, s.dynamic_arguments);
        merge_scalar(&mut self.shell.search_paths, s.search_paths);
        merge_list(&mut self.shell.rules, s.rules, s.replace);
        merge_list(&mut self.shell.redirects, s.redirects, s.replace);

        merge_paths(&mut self.read, overlay.read);
        merge_paths(&mut self.write, overlay.write);
        merge_paths(&mut self.edit, overlay.edit);
        merge_paths(&mut self.glob, overlay.glob);
        merge_paths(&mut self.grep, overlay.grep);

        let f = overlay.fetch;
        merge_scalar(&mut self.fetch.default, f.default);
        merge_list(&mut self.fetch.rules, f.rules, f.replace);
    }

    /// Compile into an immutable rule set.
    pub fn compile(
        &self,
        layer: LayerKind,
        base_dir: &Path,
        home: &Path,
        source: Option<PathBuf>,
    ) -> Result<RuleSet, ConfigError> {
        let env = PatternEnv { home, base_dir };
        compile_layer(layer, self, &env, source)
    }
}

// ── Discovery ──

/// Where the layers of one invocation come from.
#[derive(Debug, Clone)]
pub struct LayerSources {
    pub cwd: PathBuf,
    pub home: PathBuf,
    /// Session policy file (`--session` or `$GATEPOST_SESSION`).
    pub session: Option<PathBuf>,
    /// Explicit override file (`--policy`).
    pub explicit: Option<PathBuf>,
}

impl LayerSources {
    pub fn global_path(&self) -> PathBuf {
        self.home.join(".config/gatepost/policy.toml")
    }
}

/// Nearest ancestor of `cwd` holding a `.gatepost/` directory.
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|dir| dir.join(PROJECT_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// Load every configured layer, loosest first.
///
/// Resolution order:
/// 1. Global: embedded defaults overlaid by `~/.config/gatepost/policy.toml`
/// 2. Project: `<root>/.gatepost/policy.toml`
/// 3. Local: `<root>/.gatepost/policy.local.toml`
/// 4. Session file
/// 5. Explicit override file
///
/// Missing files skip their layer; unreadable or invalid ones abort.
pub fn load_layers(sources: &LayerSources) -> Result<Vec<RuleSet>, ConfigError> {
    let mut layers = Vec::new();

    let mut global = LayerConfig::default_config();
    let global_path = sources.global_path();
    let global_source = match LayerConfig::from_file(&global_path)? {
        Some(overlay) => {
            global.apply_overlay(overlay);
            Some(global_path)
        }
        None => None,
    };
    layers.push(global.compile(LayerKind::Global, &sources.cwd, &sources.home, global_source)?);

    if let Some(root) = project_root(&sources.cwd) {
        let dir = root.join(PROJECT_DIR);
        for (layer, file) in [
            (LayerKind::Project, "policy.toml"),
            (LayerKind::Local, "policy.local.toml"),
        ] {
            if let Some(set) = load_layer(layer, &dir.join(file), &root, &sources.home)? {
                layers.push(set);
            }
        }
    }

    for (layer, path) in [
        (LayerKind::Session, &sources.session),
        (LayerKind::Explicit, &sources.explicit),
    ] {
        if let Some(path) = path
            && let Some(set) = load_layer(layer, path, &sources.cwd, &sources.home)?
        {
            layers.push(set);
        }
    }

    log::debug!(
        "loaded layers: {}",
        layers
            .iter()
            .map(|l| match &l.source {
                Some(path) => format!("{} ({})", l.layer, path.display()),
                None => l.layer.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(layers)
}

/// Load and compile one layer file. `Ok(None)` when the file is absent.
pub fn load_layer(
    layer: LayerKind,
    path: &Path,
    base_dir: &Path,
    home: &Path,
) -> Result<Option<RuleSet>, ConfigError> {
    match LayerConfig::from_file(path)? {
        Some(config) => config
            .compile(layer, base_dir, home, Some(path.to_path_buf()))
            .map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(toml_str: &str) -> LayerConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn default_config_parses() {
        let config = LayerConfig::default_config();
        assert!(!config.shell.rules.is_empty());
        assert!(!config.read.rules.is_empty());
        assert_eq!(config.shell.file_rules, Some(true));
        assert_eq!(config.glob.use_read_rules, Some(true));
    }

    #[test]
    fn default_config_compiles() {
        let config = LayerConfig::default_config();
        let set = config
            .compile(LayerKind::Global, Path::new("/"), Path::new("/home/u"), None)
            .unwrap();
        assert!(!set.shell.rules.is_empty());
    }

    #[test]
    fn overlay_extends_rules() {
        let mut config = LayerConfig::default_config();
        let before = config.shell.rules.len();
        config.apply_overlay(overlay(
            r#"
            [[shell.rules]]
            command = "my-tool"
            action = "allow"
        "#,
        ));
        assert_eq!(config.shell.rules.len(), before + 1);
    }

    #[test]
    fn overlay_replace_rules() {
        let mut config = LayerConfig::default_config();
        config.apply_overlay(overlay(
            r#"
            [read]
            replace = true
            [[read.rules]]
            path = "/srv/**"
            action = "deny"
        "#,
        ));
        assert_eq!(config.read.rules.len(), 1);
        assert_eq!(config.read.rules[0].path, "/srv/**");
        // Other sections untouched
        assert!(!config.shell.rules.is_empty());
    }

    #[test]
    fn overlay_no_duplicates() {
        let mut config = LayerConfig::default_config();
        let existing = config.shell.rules[0].clone();
        let before = config.shell.rules.len();
        let mut add = LayerConfig::default();
        add.shell.rules.push(existing);
        config.apply_overlay(add);
        assert_eq!(config.shell.rules.len(), before);
    }

    #[test]
    fn overlay_scalars_override() {
        let mut config = LayerConfig::default_config();
        config.apply_overlay(overlay(
            r#"
            [settings]
            default = "deny"
            [shell]
            file_rules = false
        "#,
        ));
        assert_eq!(config.settings.default, Some(RuleAction::Deny));
        assert_eq!(config.shell.file_rules, Some(false));
        // Omitted scalars keep their value
        assert_eq!(config.glob.use_read_rules, Some(true));
    }

    #[test]
    fn empty_overlay_changes_nothing() {
        let original = LayerConfig::default_config();
        let mut config = LayerConfig::default_config();
        config.apply_overlay(overlay(""));
        assert_eq!(config, original);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            LayerConfig::from_file(&dir.path().join("absent.toml"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[[shell.rules]]\naction = \"maybe\"\n").unwrap();
        assert!(matches!(
            LayerConfig::from_file(&path),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn discovers_project_and_local_layers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let nested = root.join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(PROJECT_DIR)).unwrap();
        std::fs::write(
            root.join(PROJECT_DIR).join("policy.toml"),
            "[[shell.rules]]\ncommand = \"make\"\naction = \"allow\"\n",
        )
        .unwrap();
        std::fs::write(
            root.join(PROJECT_DIR).join("policy.local.toml"),
            "[settings]\ndefault = \"ask\"\n",
        )
        .unwrap();

        let sources = LayerSources {
            cwd: nested,
            home: dir.path().join("home"),
            session: None,
            explicit: None,
        };
        let layers = load_layers(&sources).unwrap();
        let kinds: Vec<_> = layers.iter().map(|l| l.layer).collect();
        assert_eq!(
            kinds,
            vec![LayerKind::Global, LayerKind::Project, LayerKind::Local]
        );
        // No global file on disk: the embedded defaults have no source.
        assert_eq!(layers[0].source, None);
        assert_eq!(
            layers[1].source,
            Some(root.join(PROJECT_DIR).join("policy.toml"))
        );
    }

    #[test]
    fn max_args_parses() {
        let config = overlay(
            r#"
            [[shell.rules]]
            commands = ["node"]
            args = ["--version"]
            max_args = 1
            action = "allow"
        "#,
        );
        assert_eq!(config.shell.rules[0].max_args, Some(1));
    }
}
