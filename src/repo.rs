//! Snapshot of the working copy a run operates on.

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directories never listed or read.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".svelte-kit",
    "coverage",
    ".turbo",
    ".cache",
];

/// Files larger than this are listed but treated as unreadable.
const MAX_READABLE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub size: u64,
}

impl TreeEntry {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its last extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    pub fn dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

/// File listing of a working copy, sorted by path.
#[derive(Debug, Clone)]
pub struct RepoTree {
    root: PathBuf,
    entries: Vec<TreeEntry>,
}

impl RepoTree {
    /// Walk `root`, skipping vendored and build output directories.
    pub fn scan(root: &Path) -> io::Result<RepoTree> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && IGNORED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        }) {
            let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(TreeEntry { path, size });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root.display(), files = entries.len(), "scanned working copy");
        Ok(RepoTree {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Build a tree from an explicit listing (no filesystem access for listing).
    #[cfg(test)]
    pub fn from_entries(root: &Path, mut entries: Vec<TreeEntry>) -> RepoTree {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        RepoTree {
            root: root.to_path_buf(),
            entries,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Resolve a loosely written path (`Button.tsx`, `components/Button.tsx`,
    /// `./src/components/Button.tsx`) to tree entries.
    pub fn resolve_mention(&self, mention: &str) -> Vec<&TreeEntry> {
        let cleaned = mention.trim_start_matches("./").trim_start_matches('/');
        if cleaned.is_empty() {
            return Vec::new();
        }
        if let Some(exact) = self.get(cleaned) {
            return vec![exact];
        }
        let suffix = format!("/{}", cleaned);
        self.entries
            .iter()
            .filter(|e| e.path.ends_with(&suffix))
            .collect()
    }

    /// Read a file's content. Oversized files are refused.
    pub fn read(&self, path: &str) -> io::Result<String> {
        let full = self.absolute(path)?;
        let size = std::fs::metadata(&full)?.len();
        if size > MAX_READABLE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is too large to read ({} bytes)", path, size),
            ));
        }
        std::fs::read_to_string(full)
    }

    /// Join a relative path onto the root, refusing anything that escapes it.
    pub fn absolute(&self, path: &str) -> io::Result<PathBuf> {
        if !is_safe_relative(path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes the working copy: {}", path),
            ));
        }
        Ok(self.root.join(path))
    }
}

/// True when `path` is relative and has no parent-directory components.
pub fn is_safe_relative(path: &str) -> bool {
    let p = Path::new(path);
    !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
