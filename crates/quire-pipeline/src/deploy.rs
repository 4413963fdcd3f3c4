//! Publishing an output directory to a git branch.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::fsutil::{copy_dir, remove_path};

/// Commit author used instead of the user's git configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Configuration for publishing.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Directory whose contents are published
    pub output_dir: PathBuf,

    /// Repository used to resolve a named remote
    pub project_dir: PathBuf,

    /// Working clone of the hosting branch
    pub cache_dir: PathBuf,

    /// Remote name (resolved in `project_dir`) or URL
    pub remote: String,

    /// Hosting branch
    pub branch: String,

    /// Commit message
    pub message: String,

    /// Force push (overwrites remote history)
    pub force: bool,

    /// Optional commit author
    pub identity: Option<GitIdentity>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("docs"),
            project_dir: PathBuf::from("."),
            cache_dir: PathBuf::from(".publish"),
            remote: "origin".to_string(),
            branch: "gh-pages".to_string(),
            message: "Update docs".to_string(),
            force: false,
            identity: None,
        }
    }
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    /// Branch that was published
    pub branch: String,

    /// Number of files in the published tree
    pub files: usize,

    /// Whether a new commit was created and pushed
    pub committed: bool,
}

/// Errors that can occur while publishing.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("git not found on PATH")]
    GitMissing,

    #[error("Nothing to publish: {} does not exist", .0.display())]
    MissingOutput(PathBuf),

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("Failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Publishes a directory by committing it to a branch and pushing it.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    config: DeployConfig,
    git: PathBuf,
}

impl GitPublisher {
    /// Create a publisher; fails when `git` cannot be found.
    pub fn new(config: DeployConfig) -> Result<Self, DeployError> {
        let git = which::which("git").map_err(|_| DeployError::GitMissing)?;
        Ok(Self { config, git })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Publish the output directory.
    pub async fn publish(&self) -> Result<DeployReport, DeployError> {
        let cfg = &self.config;
        if !cfg.output_dir.is_dir() {
            return Err(DeployError::MissingOutput(cfg.output_dir.clone()));
        }

        let url = self.remote_url().await;
        tracing::info!("Publishing {} to {} ({})", cfg.output_dir.display(), url, cfg.branch);

        self.prepare_cache(&url).await?;
        let files = self.replace_worktree()?;

        self.git(&cfg.cache_dir, ["add", "--all", "."]).await?;
        let status = self.git(&cfg.cache_dir, ["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            tracing::info!("No changes to publish");
            return Ok(DeployReport {
                branch: cfg.branch.clone(),
                files,
                committed: false,
            });
        }

        let mut commit: Vec<String> = Vec::new();
        if let Some(identity) = &cfg.identity {
            commit.push("-c".into());
            commit.push(format!("user.name={}", identity.name));
            commit.push("-c".into());
            commit.push(format!("user.email={}", identity.email));
        }
        commit.extend(["commit".into(), "-m".into(), cfg.message.clone()]);
        self.git(&cfg.cache_dir, &commit).await?;

        let refspec = format!("{0}:refs/heads/{0}", cfg.branch);
        let mut push = vec!["push", "origin", refspec.as_str()];
        if cfg.force {
            push.push("--force");
        }
        self.git(&cfg.cache_dir, push).await?;

        Ok(DeployReport {
            branch: cfg.branch.clone(),
            files,
            committed: true,
        })
    }

    /// URL configured for a named remote in the project, or the remote as given.
    async fn remote_url(&self) -> String {
        let key = format!("remote.{}.url", self.config.remote);
        match self
            .git(&self.config.project_dir, ["config", "--get", key.as_str()])
            .await
        {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.config.remote.clone(),
        }
    }

    /// Make the cache a checkout of the hosting branch as it is on the remote.
    async fn prepare_cache(&self, url: &str) -> Result<(), DeployError> {
        let cache = &self.config.cache_dir;
        let branch = &self.config.branch;

        if cache.join(".git").is_dir() {
            self.git(cache, ["remote", "set-url", "origin", url]).await?;
        } else {
            std::fs::create_dir_all(cache).map_err(|source| DeployError::Io {
                path: cache.clone(),
                source,
            })?;
            self.git(cache, ["init", "--quiet"]).await?;
            self.git(cache, ["remote", "add", "origin", url]).await?;
        }

        self.git(cache, ["fetch", "--quiet", "origin"]).await?;

        let tracking = format!("refs/remotes/origin/{branch}");
        let exists = self
            .git(cache, ["rev-parse", "--verify", "--quiet", tracking.as_str()])
            .await
            .is_ok();

        if exists {
            let start = format!("origin/{branch}");
            self.git(cache, ["checkout", "--quiet", "-B", branch.as_str(), start.as_str()])
                .await?;
        } else {
            tracing::debug!("Branch {} does not exist on the remote yet", branch);
            let head = format!("refs/heads/{branch}");
            self.git(cache, ["symbolic-ref", "HEAD", head.as_str()]).await?;
        }

        Ok(())
    }

    /// Replace everything except `.git` with the output directory.
    fn replace_worktree(&self) -> Result<usize, DeployError> {
        let cache = &self.config.cache_dir;
        let io_error = |path: &Path, source: io::Error| DeployError::Io {
            path: path.to_path_buf(),
            source,
        };

        let entries = std::fs::read_dir(cache).map_err(|e| io_error(cache, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(cache, e))?;
            if entry.file_name() == OsStr::new(".git") {
                continue;
            }
            remove_path(&entry.path()).map_err(|e| io_error(&entry.path(), e))?;
        }

        copy_dir(&self.config.output_dir, cache).map_err(|e| io_error(cache, e))
    }

    /// Run git in `dir`, returning stdout.
    async fn git<I, S>(&self, dir: &Path, args: I) -> Result<String, DeployError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let command = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::debug!("git {}", command);

        let output = Command::new(&self.git)
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::Git {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DeployError::Git {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
