//! Fixture preparation.
//!
//! Every session starts from a fresh copy of the fixture. A `repo` that
//! names an existing local directory is copied; anything else is treated as
//! a git URL and shallow-cloned.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::SessionError;
use crate::spec::Fixture;

/// Directories never copied out of a local fixture.
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Materializes `fixture` into `workspace`, creating it if needed.
pub async fn prepare_workspace(fixture: &Fixture, workspace: &Path) -> Result<(), SessionError> {
    fs::create_dir_all(workspace)?;

    let local = PathBuf::from(&fixture.repo);
    if local.is_dir() {
        let root = match &fixture.path {
            Some(sub) => local.join(sub),
            None => local,
        };
        let workspace = workspace.to_path_buf();
        return tokio::task::spawn_blocking(move || copy_tree(&root, &workspace))
            .await
            .map_err(|e| SessionError::Fixture(format!("Copy task panicked: {}", e)))?;
    }

    match &fixture.path {
        None => clone(fixture, workspace).await,
        Some(sub) => {
            let staging = tempfile::TempDir::new()?;
            let checkout = staging.path().join("repo");
            clone(fixture, &checkout).await?;
            let root = checkout.join(sub);
            let workspace = workspace.to_path_buf();
            tokio::task::spawn_blocking(move || copy_tree(&root, &workspace))
                .await
                .map_err(|e| SessionError::Fixture(format!("Copy task panicked: {}", e)))?
        }
    }
}

async fn clone(fixture: &Fixture, dest: &Path) -> Result<(), SessionError> {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg("--depth").arg("1");
    if let Some(git_ref) = &fixture.git_ref {
        cmd.arg("--branch").arg(git_ref);
    }
    cmd.arg(&fixture.repo)
        .arg(dest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(repo = %fixture.repo, dest = %dest.display(), "Cloning fixture");

    let output = cmd
        .output()
        .await
        .map_err(|e| SessionError::Fixture(format!("Failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(SessionError::Fixture(format!(
            "git clone of '{}' failed: {}",
            fixture.repo,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Recursively copies `src` into `dst`, preserving relative paths.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), SessionError> {
    if !src.is_dir() {
        return Err(SessionError::Fixture(format!(
            "Fixture directory not found: {}",
            src.display()
        )));
    }

    let walker = WalkDir::new(src).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !SKIPPED_DIRS
                .iter()
                .any(|skip| entry.file_name() == std::ffi::OsStr::new(skip))
    });

    for entry in walker {
        let entry = entry.map_err(|e| SessionError::Fixture(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SessionError::Fixture(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_fixture_is_copied() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("fixture");
        fs::create_dir_all(source.join("src")).unwrap();
        fs::create_dir_all(source.join(".git")).unwrap();
        fs::write(source.join("src/main.py"), "print('hi')").unwrap();
        fs::write(source.join(".git/HEAD"), "ref").unwrap();

        let fixture = Fixture {
            repo: source.to_string_lossy().to_string(),
            path: None,
            git_ref: None,
        };
        let workspace = temp.path().join("ws");
        prepare_workspace(&fixture, &workspace).await.unwrap();

        assert_eq!(
            fs::read_to_string(workspace.join("src/main.py")).unwrap(),
            "print('hi')"
        );
        assert!(!workspace.join(".git").exists());
    }

    #[tokio::test]
    async fn test_local_fixture_sub_path() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("fixture");
        fs::create_dir_all(source.join("starter")).unwrap();
        fs::write(source.join("starter/app.py"), "").unwrap();
        fs::write(source.join("top.txt"), "").unwrap();

        let fixture = Fixture {
            repo: source.to_string_lossy().to_string(),
            path: Some("starter".to_string()),
            git_ref: None,
        };
        let workspace = temp.path().join("ws");
        prepare_workspace(&fixture, &workspace).await.unwrap();

        assert!(workspace.join("app.py").exists());
        assert!(!workspace.join("top.txt").exists());
    }

    #[test]
    fn test_copy_tree_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = copy_tree(&temp.path().join("nope"), temp.path()).unwrap_err();
        assert!(matches!(err, SessionError::Fixture(_)));
    }
}
