use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};

/// Include patterns matched against paths relative to a root directory,
/// always with `/` separators.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    set: GlobSet,
}

impl FilePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0usize;
        for raw in patterns {
            let pattern = raw.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|err| anyhow!("invalid file pattern '{}': {}", pattern, err))?;
            builder.add(glob);
            count += 1;
        }
        if count == 0 {
            return Err(anyhow!("no file patterns configured"));
        }
        let set = builder
            .build()
            .map_err(|err| anyhow!("failed to compile file patterns: {}", err))?;
        Ok(Self { set })
    }

    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        let rel = path.strip_prefix(root).unwrap_or(path);
        self.set.is_match(normalize_path(rel))
    }
}

pub(crate) fn collect_directory_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| "failed to read directory entry")?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| "failed to read file type")?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn collect_matching_files(root: &Path, patterns: &FilePatterns) -> Result<Vec<PathBuf>> {
    Ok(collect_directory_files(root)?
        .into_iter()
        .filter(|path| patterns.matches(root, path))
        .collect())
}

/// True when both paths exist and resolve to the same location.
pub(crate) fn same_location(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_file;
    use tempfile::tempdir;

    #[test]
    fn collects_nested_json_files_only() {
        let dir = tempdir().expect("tempdir");
        write_file(dir.path(), "a.json", "[]");
        write_file(dir.path(), "sub/b.json", "[]");
        write_file(dir.path(), "sub/notes.txt", "");
        let patterns = FilePatterns::new(&["**/*.json"]).expect("patterns");
        let files = collect_matching_files(dir.path(), &patterns).expect("collect");
        let names: Vec<String> = files
            .iter()
            .map(|path| normalize_path(path.strip_prefix(dir.path()).unwrap()))
            .collect();
        assert_eq!(names, vec!["a.json", "sub/b.json"]);
    }

    #[test]
    fn literal_separator_limits_single_star() {
        let patterns = FilePatterns::new(&["*.json"]).expect("patterns");
        let root = Path::new("/data");
        assert!(patterns.matches(root, Path::new("/data/a.json")));
        assert!(!patterns.matches(root, Path::new("/data/sub/a.json")));
    }

    #[test]
    fn empty_pattern_list_is_rejected() {
        assert!(FilePatterns::new(&["  "]).is_err());
    }

    #[test]
    fn same_location_detects_identical_dirs() {
        let dir = tempdir().expect("tempdir");
        let other = tempdir().expect("tempdir");
        assert!(same_location(dir.path(), &dir.path().join(".")));
        assert!(!same_location(dir.path(), other.path()));
        assert!(!same_location(dir.path(), &dir.path().join("missing")));
    }
}
