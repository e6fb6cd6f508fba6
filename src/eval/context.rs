use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::resolve::{CommandResolver, resolve_path};

/// Per-request evaluation state.
///
/// Owns the command resolver and a canonicalization cache, so repeated
/// lookups within one decision hit the filesystem once. Dropped with the
/// request; nothing is shared between decisions.
#[derive(Debug)]
pub struct EvalContext {
    cwd: PathBuf,
    home: PathBuf,
    resolver: CommandResolver,
    canonical: RefCell<HashMap<String, PathBuf>>,
}

impl EvalContext {
    pub fn new(cwd: PathBuf, home: PathBuf, search_paths: Option<&[String]>) -> Self {
        let resolver = CommandResolver::new(&cwd, &home, search_paths);
        Self {
            cwd,
            home,
            resolver,
            canonical: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &CommandResolver {
        &self.resolver
    }

    /// Real location of a path as written in the request.
    pub fn canonical(&self, raw: &str) -> PathBuf {
        if let Some(hit) = self.canonical.borrow().get(raw) {
            return hit.clone();
        }
        let resolved = resolve_path(raw, &self.cwd, &self.home);
        self.canonical
            .borrow_mut()
            .insert(raw.to_string(), resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_expands_home_and_cwd() {
        let ctx = EvalContext::new(
            PathBuf::from("/nonexistent-cwd"),
            PathBuf::from("/nonexistent-home"),
            Some(&[]),
        );
        assert_eq!(
            ctx.canonical("~/notes.txt"),
            PathBuf::from("/nonexistent-home/notes.txt")
        );
        assert_eq!(
            ctx.canonical("src/../lib.rs"),
            PathBuf::from("/nonexistent-cwd/lib.rs")
        );
    }

    #[cfg(unix)]
    #[test]
    fn canonical_is_cached_for_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let real = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(real.join("target")).unwrap();
        std::os::unix::fs::symlink(real.join("target"), real.join("link")).unwrap();

        let ctx = EvalContext::new(real.clone(), real.clone(), Some(&[]));
        assert_eq!(ctx.canonical("link"), real.join("target"));
        std::fs::remove_file(real.join("link")).unwrap();
        assert_eq!(ctx.canonical("link"), real.join("target"));
    }
}
