use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{Error, Result};

/// An ephemeral checkout of a remote repository.
///
/// The tree is exclusively owned by the operation that cloned it and must be
/// gone by the time that operation returns. [`WorkingTree::remove`] is the
/// explicit release; the `Drop` impl is the backstop that runs on early
/// returns and panics.
pub struct WorkingTree {
    path: PathBuf,
    removed: bool,
}

impl WorkingTree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the checkout directory.
    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if !self.removed {
            self.removed = true;
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

impl Drop for WorkingTree {
    fn drop(&mut self) {
        self.remove_inner();
    }
}

/// Clones repositories into per-request directories under a temp root.
pub struct GitService {
    temp_dir: PathBuf,
}

impl GitService {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }

    /// Shallow-clones `repo_url` into a fresh directory named after the
    /// requesting user and the current time. The stderr of a failed clone
    /// becomes the error reason shown to the user.
    pub async fn clone_repository(&self, repo_url: &str, user_id: u64) -> Result<WorkingTree> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let clone_dir = self.temp_dir.join(format!(
            "repo_{}_{}",
            user_id,
            chrono::Utc::now().timestamp_millis()
        ));

        let output = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(repo_url)
            .arg(&clone_dir)
            .output()
            .await
            .map_err(|e| Error::CloneFailed(format!("could not run git: {}", e)))?;

        if !output.status.success() {
            // A failed clone may leave a partial directory behind
            let _ = tokio::fs::remove_dir_all(&clone_dir).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("unknown git error")
                .trim()
                .to_string();
            return Err(Error::CloneFailed(reason));
        }

        Ok(WorkingTree {
            path: clone_dir,
            removed: false,
        })
    }

    /// Removes every leftover `repo_*` directory under the temp root.
    /// Called on startup to sweep trees orphaned by a previous crash.
    pub async fn cleanup_all(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with("repo_") {
                let _ = tokio::fs::remove_dir_all(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_tree_drop_removes_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("repo_1_123");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.js"), "export default {}").unwrap();

        {
            let _tree = WorkingTree {
                path: dir.clone(),
                removed: false,
            };
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_explicit_remove_is_idempotent_with_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("repo_2_456");
        std::fs::create_dir_all(&dir).unwrap();

        let tree = WorkingTree {
            path: dir.clone(),
            removed: false,
        };
        tree.remove();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_clone_rejects_unreachable_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        let git = GitService::new(temp.path().to_path_buf());

        let result = git
            .clone_repository("https://127.0.0.1:1/none/none.git", 1)
            .await;
        assert!(matches!(result, Err(Error::CloneFailed(_))));

        // No partial tree left behind
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_all_only_removes_repo_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("repo_9_1")).unwrap();
        std::fs::create_dir_all(temp.path().join("keepme")).unwrap();

        let git = GitService::new(temp.path().to_path_buf());
        git.cleanup_all().await.unwrap();

        assert!(!temp.path().join("repo_9_1").exists());
        assert!(temp.path().join("keepme").exists());
    }
}
