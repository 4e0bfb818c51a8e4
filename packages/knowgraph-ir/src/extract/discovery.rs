//! Source tree discovery: walkdir + glob filters.

use crate::errors::{IrError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "node_modules",
    "build",
    "dist",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
];

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Files strictly larger than this are skipped with a warning.
    pub max_file_bytes: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: vec!["**/*.py".to_string()],
            exclude: Vec::new(),
            max_file_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub abs_path: PathBuf,
    /// Repo-relative, `/`-separated.
    pub rel_path: String,
    pub size_bytes: u64,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IrError::InvalidPath(format!("bad glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IrError::InvalidPath(format!("glob set: {e}")))
}

fn is_excluded_dir(name: &str) -> bool {
    DEFAULT_EXCLUDED_DIRS.contains(&name) || name.ends_with(".egg-info")
}

/// Enumerate candidate files under `source_path`. Returns files sorted by
/// relative path plus warnings for oversized files.
pub fn discover(
    source_path: &Path,
    config: &DiscoveryConfig,
) -> Result<(Vec<DiscoveredFile>, Vec<String>)> {
    if !source_path.exists() {
        return Err(IrError::InvalidPath(source_path.display().to_string()));
    }
    if !source_path.is_dir() {
        return Err(IrError::NotADirectory(source_path.display().to_string()));
    }

    let include = build_globset(&config.include)?;
    let exclude = build_globset(&config.exclude)?;

    let mut files = Vec::new();
    let mut warnings = Vec::new();

    let walker = WalkDir::new(source_path).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() && entry.depth() > 0 {
            let name = entry.file_name().to_string_lossy();
            !is_excluded_dir(&name)
        } else {
            true
        }
    });

    for entry in walker {
        let entry = entry.map_err(|e| IrError::InvalidPath(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(source_path)
            .unwrap_or(entry.path());
        let rel_path = rel.to_string_lossy().replace('\\', "/");

        if !include.is_match(&rel_path) || exclude.is_match(&rel_path) {
            continue;
        }

        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size_bytes > config.max_file_bytes {
            warnings.push(format!(
                "skipped {rel_path}: {size_bytes} bytes exceeds the {} byte cap",
                config.max_file_bytes
            ));
            continue;
        }

        files.push(DiscoveredFile {
            abs_path: entry.path().to_path_buf(),
            rel_path,
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok((files, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discovers_python_files_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.py", "x = 1");
        touch(dir.path(), "a.py", "x = 1");
        touch(dir.path(), "pkg/c.py", "x = 1");
        touch(dir.path(), "readme.md", "not python");

        let (files, warnings) = discover(dir.path(), &DiscoveryConfig::default()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.py", "b.py", "pkg/c.py"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_default_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "keep.py", "x = 1");
        touch(dir.path(), ".venv/lib/skip.py", "x = 1");
        touch(dir.path(), "__pycache__/skip.py", "x = 1");
        touch(dir.path(), "proj.egg-info/skip.py", "x = 1");

        let (files, _) = discover(dir.path(), &DiscoveryConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "keep.py");
    }

    #[test]
    fn test_size_cap_boundary() {
        let dir = TempDir::new().unwrap();
        let config = DiscoveryConfig {
            max_file_bytes: 10,
            ..Default::default()
        };
        touch(dir.path(), "at_cap.py", "0123456789"); // exactly 10 bytes
        touch(dir.path(), "over.py", "0123456789X"); // 11 bytes

        let (files, warnings) = discover(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "at_cap.py");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("over.py"));
    }

    #[test]
    fn test_custom_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "main.py", "x = 1");
        touch(dir.path(), "tests/test_main.py", "x = 1");

        let config = DiscoveryConfig {
            exclude: vec!["tests/**".to_string()],
            ..Default::default()
        };
        let (files, _) = discover(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "main.py");
    }

    #[test]
    fn test_missing_path_is_invalid() {
        let result = discover(Path::new("/nonexistent/nowhere"), &DiscoveryConfig::default());
        assert!(matches!(result, Err(IrError::InvalidPath(_))));
    }

    #[test]
    fn test_file_path_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.py", "x = 1");
        let result = discover(&dir.path().join("a.py"), &DiscoveryConfig::default());
        assert!(matches!(result, Err(IrError::NotADirectory(_))));
    }
}
