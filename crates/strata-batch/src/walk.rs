//! Recursive file collection

use std::path::{Path, PathBuf};
use tracing::debug;

use strata_core::{StrataError, StrataResult};

/// All regular files under `root`, sorted. Entries whose file name matches
/// one of `exclude` (glob syntax) are skipped; for a directory that skips
/// the whole subtree. Symlinks are not followed.
pub fn collect_files(root: &Path, exclude: &[String]) -> StrataResult<Vec<PathBuf>> {
    let matchers = exclude
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| StrataError::Config(format!("bad exclude pattern {p:?}: {e}")))
        })
        .collect::<StrataResult<Vec<_>>>()?;

    let mut files = Vec::new();
    walk(root, &matchers, &mut files)?;
    files.sort();
    debug!(root = %root.display(), files = files.len(), "collected files");
    Ok(files)
}

fn walk(dir: &Path, excludes: &[glob::Pattern], out: &mut Vec<PathBuf>) -> StrataResult<()> {
    for entry in std::fs::read_dir(dir).map_err(|e| StrataError::io_at(dir, e))? {
        let entry = entry.map_err(|e| StrataError::io_at(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| StrataError::io_at(&path, e))?;

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if excludes.iter().any(|p| p.matches(&name)) {
            continue;
        }

        if file_type.is_dir() {
            walk(&path, excludes, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::create_dir_all(root.join("skipme")).unwrap();
        std::fs::write(root.join("b.txt"), b"b").unwrap();
        std::fs::write(root.join("a.log"), b"a").unwrap();
        std::fs::write(root.join("sub/c.bin"), b"c").unwrap();
        std::fs::write(root.join("sub/deeper/d.txt"), b"d").unwrap();
        std::fs::write(root.join("skipme/e.txt"), b"e").unwrap();

        let files = collect_files(root, &["*.log".into(), "skipme".into()]).unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec!["b.txt", "sub/c.bin", "sub/deeper/d.txt"]);
    }

    #[test]
    fn test_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_files(dir.path(), &["[".into()]).unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_missing_root() {
        let err = collect_files(Path::new("/nonexistent/strata/root"), &[]).unwrap_err();
        assert!(matches!(err, StrataError::IoAt { .. }));
    }
}
