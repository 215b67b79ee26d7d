//! Git history enrichment.
//!
//! Appends the subjects of recent commits that touched a file, giving the
//! retrieval pipeline a lexical handle on *why* a file changed. Resolution
//! goes through the `git` binary; machines without git simply skip the block.

use std::path::Path;

/// How many commit subjects to keep per file.
pub const DEFAULT_COMMIT_COUNT: usize = 50;

/// Return the last `count` commit subjects touching `path`, newest first,
/// one per line. `None` when the file is outside a working tree, git is
/// unavailable, or the file has no history. Never fatal.
pub fn recent_subjects(path: &Path, count: usize) -> Option<String> {
    let dir = path.parent()?;
    let file_name = path.file_name()?;

    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["log", &format!("-{count}"), "--format=%s", "--"])
        .arg(file_name)
        .output()
        .ok()?;

    if !output.status.success() {
        tracing::debug!(
            path = %path.display(),
            "git log unavailable, skipping history block"
        );
        return None;
    }

    let subjects = String::from_utf8_lossy(&output.stdout);
    let trimmed = subjects.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_working_tree_returns_none() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("loose.txt");
        std::fs::write(&path, "not tracked").expect("write");
        assert!(recent_subjects(&path, 50).is_none());
    }

    #[test]
    fn test_rootless_path_returns_none() {
        assert!(recent_subjects(Path::new("/"), 50).is_none());
    }
}
