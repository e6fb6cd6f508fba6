//! Symlink-safe path canonicalization.

use std::path::{Component, Path, PathBuf};

/// Symlink hops followed for a dangling final component.
const MAX_LINK_DEPTH: usize = 40;

/// Resolve `path` to a symlink-free absolute path.
///
/// `~` and `~/…` expand to `home`, relative paths join onto `cwd`, `.` and
/// `..` are cleaned lexically, then symlinks are resolved. When the path
/// does not exist yet, the deepest existing ancestor is resolved and the
/// missing suffix re-appended, so a symlinked directory still redirects a
/// not-yet-created file to its real location.
pub fn resolve_path(path: &str, cwd: &Path, home: &Path) -> PathBuf {
    let expanded = expand_home(path, home);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    canonicalize_lenient(&lexical_normalize(&joined))
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Expand `~` and `$VAR` in a configured template. `~` and `$HOME` both
/// mean `home`, not the process environment's home.
pub fn expand_template(raw: &str, home: &Path) -> Result<String, String> {
    let home = home.to_string_lossy().into_owned();
    shellexpand::full_with_context(
        raw,
        || Some(home.clone()),
        |var: &str| -> Result<Option<String>, std::env::VarError> {
            if var == "HOME" {
                return Ok(Some(home.clone()));
            }
            match std::env::var(var) {
                Ok(v) => Ok(Some(v)),
                Err(std::env::VarError::NotPresent) => Ok(None),
                Err(e) => Err(e),
            }
        },
    )
    .map(|expanded| expanded.into_owned())
    .map_err(|e| e.to_string())
}

/// Remove `.` and resolve `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `/..` stays `/`.
                if !matches!(out.components().next_back(), None | Some(Component::RootDir)) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize as much of an absolute path as exists.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    canonicalize_depth(path, 0)
}

fn canonicalize_depth(path: &Path, depth: usize) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }

    // A dangling symlink: follow it to where a write would land.
    if depth < MAX_LINK_DEPTH
        && let Ok(meta) = std::fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
        && let Ok(target) = std::fs::read_link(path)
    {
        let base = path.parent().unwrap_or(Path::new("/"));
        let next = lexical_normalize(&base.join(target));
        return canonicalize_depth(&next, depth + 1);
    }

    let mut suffix = Vec::new();
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            suffix.push(name.to_os_string());
        }
        current = parent;
        if let Ok(real) = std::fs::canonicalize(current) {
            let mut rebuilt = real;
            for part in suffix.iter().rev() {
                rebuilt.push(part);
            }
            return rebuilt;
        }
    }
    path.to_path_buf()
}

/// Heuristic: does a bare argument look like a filesystem path?
pub fn is_path_like(s: &str) -> bool {
    if matches!(s, "~" | "." | "..") {
        return true;
    }
    if ["/", "./", "../", "~/"].iter().any(|p| s.starts_with(p)) {
        return true;
    }
    s.contains('/') && !s.starts_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(p: &Path) -> PathBuf {
        std::fs::canonicalize(p).unwrap()
    }

    #[test]
    fn path_like_heuristic() {
        for s in ["/etc", "./a", "../b", "~/x", "~", ".", "..", "src/main.rs"] {
            assert!(is_path_like(s), "{s}");
        }
        for s in ["ls", "-rf", "--out=a/b", "main.rs", "~user"] {
            assert!(!is_path_like(s), "{s}");
        }
    }

    #[test]
    fn lexical_cleanup() {
        assert_eq!(
            lexical_normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(lexical_normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn tilde_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        let base = real(dir.path());
        std::fs::create_dir(base.join("home")).unwrap();
        let home = base.join("home");

        assert_eq!(resolve_path("~", &base, &home), home);
        assert_eq!(resolve_path("~/f", &base, &home), home.join("f"));
        assert_eq!(resolve_path("home/../x", &base, &home), base.join("x"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_resolves_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let base = real(dir.path());
        let secret = base.join("secret");
        std::fs::create_dir(&secret).unwrap();
        std::fs::write(secret.join("key"), "x").unwrap();
        std::os::unix::fs::symlink(&secret, base.join("innocent")).unwrap();

        assert_eq!(
            resolve_path("innocent/key", &base, &base),
            secret.join("key")
        );
        // Missing leaf under a symlinked directory still lands in the target.
        assert_eq!(
            resolve_path("innocent/new/file", &base, &base),
            secret.join("new/file")
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_follows_target() {
        let dir = tempfile::tempdir().unwrap();
        let base = real(dir.path());
        let out = base.join("elsewhere");
        std::fs::create_dir(&out).unwrap();
        std::os::unix::fs::symlink(out.join("created"), base.join("link")).unwrap();

        assert_eq!(resolve_path("link", &base, &base), out.join("created"));
    }
}
