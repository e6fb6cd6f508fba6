//! Command-name resolution with a per-context cache.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::path::expand_template;

/// Shell builtins and reserved words. They run inside the shell process,
/// so no search-path manipulation can remap them.
const BUILTINS: &[&str] = &[
    "!", ".", ":", "[", "[[", "]]", "{", "}", "alias", "bg", "bind", "break", "builtin",
    "caller", "case", "cd", "command", "compgen", "complete", "compopt", "continue", "coproc",
    "declare", "dirs", "disown", "do", "done", "echo", "elif", "else", "enable", "esac", "eval",
    "exec", "exit", "export", "false", "fc", "fg", "fi", "for", "function", "getopts", "hash",
    "help", "history", "if", "in", "jobs", "kill", "let", "local", "logout", "mapfile", "popd",
    "printf", "pushd", "pwd", "read", "readarray", "readonly", "return", "select", "set",
    "shift", "shopt", "source", "suspend", "test", "then", "time", "times", "trap", "true",
    "type", "typeset", "ulimit", "umask", "unalias", "unset", "until", "wait", "while",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Outcome of resolving a command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Builtin,
    /// Real, symlink-free path of the binary.
    Path(PathBuf),
    Unresolved,
}

/// Resolves command names to binaries. Owned by one evaluation context;
/// the cache lives exactly as long as that context.
#[derive(Debug)]
pub struct CommandResolver {
    cwd: PathBuf,
    /// Explicit search directories, already expanded. `None` means `$PATH`.
    search_dirs: Option<Vec<PathBuf>>,
    cache: RefCell<HashMap<String, Resolution>>,
}

impl CommandResolver {
    /// `search_paths` entries may contain `~` and `$VAR` placeholders;
    /// both `~` and `$HOME` expand to `home`.
    pub fn new(cwd: &Path, home: &Path, search_paths: Option<&[String]>) -> Self {
        let search_dirs = search_paths.map(|templates| {
            templates
                .iter()
                .filter_map(|t| match expand_template(t, home) {
                    Ok(dir) => Some(PathBuf::from(dir)),
                    Err(e) => {
                        log::warn!("skipping search path {t:?}: {e}");
                        None
                    }
                })
                .collect()
        });
        Self {
            cwd: cwd.to_path_buf(),
            search_dirs,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        if let Some(hit) = self.cache.borrow().get(name) {
            return hit.clone();
        }
        let resolved = self.resolve_uncached(name);
        log::trace!("resolved command {name:?} -> {resolved:?}");
        self.cache
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        resolved
    }

    fn resolve_uncached(&self, name: &str) -> Resolution {
        if name.is_empty() {
            return Resolution::Unresolved;
        }
        if is_builtin(name) {
            return Resolution::Builtin;
        }

        let path = Path::new(name);
        let found = if path.is_absolute() {
            path.exists().then(|| path.to_path_buf())
        } else if name.contains('/') {
            let joined = self.cwd.join(path);
            joined.exists().then_some(joined)
        } else {
            match &self.search_dirs {
                Some(dirs) => dirs
                    .iter()
                    .map(|d| d.join(name))
                    .find(|candidate| is_executable(candidate)),
                None => which::which_in(name, std::env::var_os("PATH"), &self.cwd).ok(),
            }
        };

        match found.map(std::fs::canonicalize) {
            Some(Ok(real)) => Resolution::Path(real),
            _ => Resolution::Unresolved,
        }
    }

    /// Whether `invoked` names the same program as a rule's `rule_name`.
    ///
    /// Equal names always match. Otherwise both must resolve to one real
    /// binary *and* share a basename: a symlink to another binary fails the
    /// path check, and a multi-call binary behind several names fails the
    /// basename check.
    ///
    /// When the rule's program is not installed, the invoked command only
    /// matches if the binary it really runs carries the rule's name.
    pub fn same_command(&self, rule_name: &str, invoked: &str) -> bool {
        if rule_name == invoked {
            return true;
        }
        if basename(rule_name) != basename(invoked) {
            return false;
        }
        match (self.resolve(rule_name), self.resolve(invoked)) {
            (Resolution::Path(a), Resolution::Path(b)) => a == b,
            (Resolution::Unresolved, Resolution::Path(real)) => {
                !rule_name.contains('/')
                    && real.file_name().is_some_and(|n| n == basename(rule_name))
            }
            _ => false,
        }
    }
}

pub fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::canonicalize(p).unwrap()
    }

    #[test]
    fn builtins_skip_filesystem() {
        let r = CommandResolver::new(Path::new("/"), Path::new("/"), Some(&[]));
        assert_eq!(r.resolve("cd"), Resolution::Builtin);
        assert_eq!(r.resolve("echo"), Resolution::Builtin);
    }

    #[test]
    fn explicit_search_list_wins_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("tool"), "not executable").unwrap();
        let expected = script(&b, "tool");

        let dirs = vec![
            a.to_string_lossy().into_owned(),
            b.to_string_lossy().into_owned(),
        ];
        let r = CommandResolver::new(dir.path(), dir.path(), Some(&dirs));
        assert_eq!(r.resolve("tool"), Resolution::Path(expected));
        assert_eq!(r.resolve("missing"), Resolution::Unresolved);
    }

    #[test]
    fn relative_name_resolves_through_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = script(dir.path(), "real-tool");
        std::os::unix::fs::symlink(&real, dir.path().join("alias")).unwrap();

        let r = CommandResolver::new(dir.path(), dir.path(), Some(&[]));
        assert_eq!(r.resolve("./alias"), Resolution::Path(real));
    }

    #[test]
    fn symlinked_binary_does_not_satisfy_other_name() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let ls = script(&bin, "ls");
        let python = script(&bin, "python");
        std::os::unix::fs::symlink(&python, dir.path().join("ls")).unwrap();

        let dirs = vec![bin.to_string_lossy().into_owned()];
        let r = CommandResolver::new(dir.path(), dir.path(), Some(&dirs));
        assert!(r.same_command("ls", &ls.to_string_lossy()));
        assert!(!r.same_command("ls", "./ls"));
    }

    #[test]
    fn multicall_binary_needs_matching_basename() {
        let dir = tempfile::tempdir().unwrap();
        let multi = script(dir.path(), "multicall");
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        std::os::unix::fs::symlink(&multi, bin.join("ls")).unwrap();
        std::os::unix::fs::symlink(&multi, bin.join("rm")).unwrap();

        let dirs = vec![bin.to_string_lossy().into_owned()];
        let r = CommandResolver::new(dir.path(), dir.path(), Some(&dirs));
        assert!(!r.same_command("ls", "rm"));
        assert!(r.same_command("ls", &bin.join("ls").to_string_lossy()));
    }

    #[test]
    fn uninstalled_rule_name_needs_matching_target() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let shell = script(dir.path(), "sh");
        let elsewhere = dir.path().join("opt");
        std::fs::create_dir(&elsewhere).unwrap();
        let tree = script(&elsewhere, "tree");
        std::os::unix::fs::symlink(&shell, dir.path().join("tree")).unwrap();

        let dirs = vec![empty.to_string_lossy().into_owned()];
        let r = CommandResolver::new(dir.path(), dir.path(), Some(&dirs));
        assert_eq!(r.resolve("tree"), Resolution::Unresolved);
        assert!(!r.same_command("tree", "./tree"));
        assert!(r.same_command("tree", &tree.to_string_lossy()));
    }

    #[test]
    fn search_paths_expand_against_given_home() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let tool = script(&bin, "tool");

        let dirs = vec!["~/bin".to_string()];
        let r = CommandResolver::new(Path::new("/"), dir.path(), Some(&dirs));
        assert_eq!(r.resolve("tool"), Resolution::Path(tool.clone()));

        let dirs = vec!["$HOME/bin".to_string()];
        let r = CommandResolver::new(Path::new("/"), dir.path(), Some(&dirs));
        assert_eq!(r.resolve("tool"), Resolution::Path(tool));
    }

    #[test]
    fn results_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "once");
        let dirs = vec![dir.path().to_string_lossy().into_owned()];
        let r = CommandResolver::new(dir.path(), dir.path(), Some(&dirs));
        assert_eq!(r.resolve("once"), Resolution::Path(path.clone()));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(r.resolve("once"), Resolution::Path(path));
    }
}
