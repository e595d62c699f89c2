//! Ignore rules for the file watcher
//!
//! Rules come from the workspace `.gitignore` plus a fixed set of
//! structural folders and high-churn derived files, compiled with full
//! gitignore semantics (negations, directory-only and anchored patterns).

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::{info, warn};

/// Version control metadata and dependency caches
pub const STRUCTURAL_IGNORES: &[&str] = &[".git/", "node_modules/"];

/// Derived content rewritten on nearly every edit
pub const CHURN_IGNORES: &[&str] = &["output/", "$__StoryList*"];

/// Compiled ignore rules for one watched workspace
#[derive(Debug, Clone)]
pub struct IgnoreList {
    matcher: Gitignore,
}

impl IgnoreList {
    /// Build from `.gitignore` content plus the fixed exclusions
    ///
    /// The fixed exclusions come first, so a `.gitignore` negation can
    /// re-include a derived file. Invalid lines are logged and skipped.
    pub fn from_gitignore(workspace_root: &Path, content: &str) -> Self {
        let mut builder = GitignoreBuilder::new(workspace_root);
        for line in STRUCTURAL_IGNORES
            .iter()
            .chain(CHURN_IGNORES.iter())
            .copied()
            .chain(content.lines())
        {
            if let Err(e) = builder.add_line(None, line) {
                warn!("Invalid ignore pattern '{}': {}", line.trim(), e);
            }
        }
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!("Failed to compile ignore rules: {}", e);
            Gitignore::empty()
        });
        Self { matcher }
    }

    /// Read `<root>/.gitignore`, tolerating its absence
    pub async fn load(workspace_root: &Path) -> Self {
        let path = workspace_root.join(".gitignore");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Self::from_gitignore(workspace_root, &content),
            Err(e) => {
                info!(
                    root_path = %workspace_root.display(),
                    "No .gitignore loaded from {} ({}), using built-in ignores only",
                    path.display(),
                    e
                );
                Self::from_gitignore(workspace_root, "")
            }
        }
    }

    /// Number of compiled patterns, negations included
    pub fn len(&self) -> usize {
        self.matcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }

    /// Whether `relative`, a path under the workspace root, should be ignored
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.has_root() || relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Like [`IgnoreList::is_ignored`] for an absolute event path
    ///
    /// Paths outside `workspace_root` are never ignored. A path that no
    /// longer exists is treated as a file.
    pub fn is_ignored_under(&self, workspace_root: &Path, path: &Path) -> bool {
        match path.strip_prefix(workspace_root) {
            Ok(relative) => self.is_ignored(relative, path.is_dir()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn rules(content: &str) -> IgnoreList {
        IgnoreList::from_gitignore(Path::new("/w/main"), content)
    }

    #[test]
    fn test_builtin_ignores() {
        let ignores = rules("");
        assert!(ignores.is_ignored(Path::new(".git/index"), false));
        assert!(ignores.is_ignored(Path::new("plugins/node_modules/x/index.js"), false));
        assert!(ignores.is_ignored(Path::new("output/index.html"), false));
        assert!(ignores.is_ignored(Path::new("tiddlers/$__StoryList_1.tid"), false));
        assert!(!ignores.is_ignored(Path::new("tiddlers/Hello.tid"), false));
    }

    #[test]
    fn test_gitignore_lines_skip_comments_and_blanks() {
        let ignores = rules("# comment\n\n*.log\n  \n");
        assert_eq!(ignores.len(), 1 + STRUCTURAL_IGNORES.len() + CHURN_IGNORES.len());
        assert!(ignores.is_ignored(Path::new("logs/server.log"), false));
        assert!(!ignores.is_ignored(Path::new("tiddlers/log.tid"), false));
    }

    #[test]
    fn test_anchored_pattern_matches_from_root_only() {
        let ignores = rules("tiddlers/subwiki\n/drafts/\n");
        assert!(ignores.is_ignored(Path::new("tiddlers/subwiki/sub/a.tid"), false));
        assert!(ignores.is_ignored(Path::new("drafts/one.tid"), false));
        assert!(!ignores.is_ignored(Path::new("other/tiddlers/subwiki/a.tid"), false));
        assert!(!ignores.is_ignored(Path::new("tiddlers/drafts/one.tid"), false));
    }

    #[test]
    fn test_negation_reincludes_file() {
        let ignores = rules("*.tid\n!keep.tid\n");
        assert!(ignores.is_ignored(Path::new("tiddlers/drop.tid"), false));
        assert!(!ignores.is_ignored(Path::new("tiddlers/keep.tid"), false));
    }

    #[test]
    fn test_directory_pattern_skips_files_of_same_name() {
        let ignores = rules("cache/\n");
        assert!(ignores.is_ignored(Path::new("cache"), true));
        assert!(ignores.is_ignored(Path::new("cache/entry.json"), false));
        assert!(!ignores.is_ignored(Path::new("tiddlers/cache"), false));
    }

    #[test]
    fn test_paths_outside_root_are_not_ignored() {
        let ignores = rules("");
        let root = PathBuf::from("/w/main");
        assert!(ignores.is_ignored_under(&root, Path::new("/w/main/.git/HEAD")));
        assert!(!ignores.is_ignored_under(&root, Path::new("/elsewhere/.git/HEAD")));
        assert!(!ignores.is_ignored(Path::new("/w/main/.git/HEAD"), false));
    }

    #[tokio::test]
    async fn test_load_tolerates_missing_gitignore() {
        let temp = TempDir::new().unwrap();
        let ignores = IgnoreList::load(temp.path()).await;
        assert_eq!(ignores.len(), STRUCTURAL_IGNORES.len() + CHURN_IGNORES.len());

        tokio::fs::write(temp.path().join(".gitignore"), "secret.tid\n")
            .await
            .unwrap();
        let ignores = IgnoreList::load(temp.path()).await;
        assert!(ignores.is_ignored(Path::new("tiddlers/secret.tid"), false));
    }
}
