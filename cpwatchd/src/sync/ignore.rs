//! Name and extension filters applied before anything enters the sync pipeline.
//!
//! Names match case-sensitively; extensions match case-insensitively. Every
//! segment between the mirror root and the leaf is checked, so an ignored
//! directory hides its whole subtree.

use std::collections::HashSet;
use std::path::{Component, Path};

pub const DEFAULT_IGNORED_NAMES: &[&str] = &[
    ".git",
    ".vscode",
    "__pycache__",
    ".idea",
    "node_modules",
    ".DS_Store",
    "Thumbs.db",
];

pub const DEFAULT_IGNORED_EXTENSIONS: &[&str] = &[".swp", ".tmp"];

#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    names: HashSet<String>,
    extensions: HashSet<String>,
}

impl IgnoreMatcher {
    /// Extensions may be given with or without the leading dot.
    pub fn new<N, E>(names: N, extensions: E) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if self.names.contains(name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => {
                self.extensions.contains(&ext.to_ascii_lowercase())
            }
            _ => false,
        }
    }

    /// Checks every segment of `path` below `root` (or of the whole path when
    /// it is not under `root`).
    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(part) => part.to_str().is_some_and(|s| self.is_ignored_name(s)),
            _ => false,
        })
    }
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::new(
            DEFAULT_IGNORED_NAMES.iter().copied(),
            DEFAULT_IGNORED_EXTENSIONS.iter().copied(),
        )
    }
}
