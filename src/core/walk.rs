//! Read-only project tree traversal shared by the validators.

use crate::core::error::CoraError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never descended into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".terraform",
    ".next",
    "dist",
    "build",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
];

/// All files under `root`, sorted, skipping vendored and generated trees.
///
/// The root itself is always scanned, whatever its name. Symlinks are not
/// followed.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, CoraError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIP_DIRS.contains(&name))
        });

    let mut out = Vec::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    out.sort();
    Ok(out)
}

/// Files under `root` whose extension is in `extensions`.
pub fn collect_with_extensions(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, CoraError> {
    Ok(collect_files(root)?
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e))
        })
        .collect())
}

/// `path` relative to `root` when possible, for stable report locations.
pub fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Whether any component of `path` (relative to `root`) equals one of `names`.
pub fn has_component(root: &Path, path: &Path, names: &[&str]) -> bool {
    relative(root, path).components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| names.contains(&s))
    })
}

/// File contents as text. Invalid UTF-8 sequences are replaced rather than
/// dropping the file; `None` only when the file cannot be read at all.
pub fn read_text(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

/// Simple glob match: `**` spans directories, `*` stays within one level.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') if p.get(1) == Some(&b'*') => {
                let rest = p[2..].strip_prefix(b"/").unwrap_or(&p[2..]);
                (0..=t.len()).any(|i| matches(rest, &t[i..]))
            }
            Some(b'*') => {
                let rest = &p[1..];
                for i in 0..=t.len() {
                    if matches(rest, &t[i..]) {
                        return true;
                    }
                    if t.get(i) == Some(&b'/') {
                        break;
                    }
                }
                false
            }
            Some(c) => t.first() == Some(c) && matches(&p[1..], &t[1..]),
        }
    }
    matches(pattern.as_bytes(), text.as_bytes())
}
