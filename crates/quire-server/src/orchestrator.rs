//! Glob-bound watch triggers that run task sequences and signal reloads.
//!
//! Every binding owns one worker with a single-slot trigger channel. A run
//! that is already queued absorbs further triggers, so changes arriving
//! while a binding runs produce exactly one follow-up run.

use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use quire_tasks::{Step, TaskRunner};
use tokio::sync::{broadcast, mpsc};

use crate::reload::LiveReload;
use crate::watcher::FileWatcher;

/// Something that can tell browsers to reload.
pub trait Reloader: Send + Sync {
    /// Signal a reload of `path`. Must not block.
    fn reload(&self, path: &str);
}

impl Reloader for LiveReload {
    fn reload(&self, path: &str) {
        self.refresh(path);
    }
}

/// Errors that can occur while setting up watches.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Invalid watch pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("File watch error: {0}")]
    Watch(String),
}

/// Reported after every binding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRun {
    /// Index of the binding, in registration order
    pub binding: usize,

    /// Whether the task sequence succeeded
    pub success: bool,
}

/// A set of glob patterns bound to a task sequence.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    patterns: Vec<String>,
    globs: GlobSet,
    tasks: Vec<Step>,
    reload_after: bool,
}

impl WatchBinding {
    /// Compile the patterns of a binding.
    pub fn new<P, S>(patterns: P, tasks: Vec<Step>, reload_after: bool) -> Result<Self, WatchError>
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|e| WatchError::InvalidPattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;

        Ok(Self {
            patterns,
            globs,
            tasks,
            reload_after,
        })
    }

    /// Whether a root-relative path matches.
    pub fn matches(&self, path: &str) -> bool {
        self.globs.is_match(path)
    }

    /// Patterns as given.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Steps run when the binding fires.
    pub fn tasks(&self) -> &[Step] {
        &self.tasks
    }
}

/// Collects watch bindings before they are armed.
pub struct WatchOrchestrator {
    runner: TaskRunner,
    reloader: Option<(Arc<dyn Reloader>, String)>,
    bindings: Vec<WatchBinding>,
}

impl WatchOrchestrator {
    /// Create an orchestrator running tasks with `runner`.
    pub fn new(runner: TaskRunner) -> Self {
        Self {
            runner,
            reloader: None,
            bindings: Vec::new(),
        }
    }

    /// Signal `reloader` with `url` after bindings that ask for it.
    pub fn with_reloader(mut self, reloader: Arc<dyn Reloader>, url: impl Into<String>) -> Self {
        self.reloader = Some((reloader, url.into()));
        self
    }

    /// Bind `patterns` to `tasks`, optionally followed by a reload signal.
    pub fn watch<P, S, T>(
        &mut self,
        patterns: P,
        tasks: impl IntoIterator<Item = T>,
        reload_after: bool,
    ) -> Result<&mut Self, WatchError>
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        T: Into<Step>,
    {
        let tasks = tasks.into_iter().map(Into::into).collect();
        self.bindings
            .push(WatchBinding::new(patterns, tasks, reload_after)?);
        Ok(self)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no bindings were added.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Start one worker per binding.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(self) -> ArmedOrchestrator {
        let (events, _) = broadcast::channel(64);
        let reloader = self.reloader.map(Arc::new);

        let triggers = self
            .bindings
            .into_iter()
            .enumerate()
            .map(|(index, binding)| {
                let (tx, rx) = mpsc::channel(1);
                let worker = Worker {
                    index,
                    binding: binding.clone(),
                    runner: self.runner.clone(),
                    reloader: reloader.clone(),
                    events: events.clone(),
                };
                tokio::spawn(worker.run(rx));
                tracing::debug!("Watching {:?}", binding.patterns);
                (binding, tx)
            })
            .collect();

        ArmedOrchestrator {
            inner: Arc::new(Armed { triggers, events }),
        }
    }
}

struct Worker {
    index: usize,
    binding: WatchBinding,
    runner: TaskRunner,
    reloader: Option<Arc<(Arc<dyn Reloader>, String)>>,
    events: broadcast::Sender<BindingRun>,
}

impl Worker {
    async fn run(self, mut triggers: mpsc::Receiver<()>) {
        while triggers.recv().await.is_some() {
            let result = self.runner.run_sequence(self.binding.tasks.clone()).await;

            let success = match result {
                Ok(()) => {
                    if self.binding.reload_after {
                        if let Some(reloader) = &self.reloader {
                            let (reloader, url) = reloader.as_ref();
                            reloader.reload(url);
                        }
                    }
                    true
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    false
                }
            };

            let _ = self.events.send(BindingRun {
                binding: self.index,
                success,
            });
        }
    }
}

struct Armed {
    triggers: Vec<(WatchBinding, mpsc::Sender<()>)>,
    events: broadcast::Sender<BindingRun>,
}

/// Bindings with running workers.
///
/// Cheap to clone; workers stop once every clone is dropped.
#[derive(Clone)]
pub struct ArmedOrchestrator {
    inner: Arc<Armed>,
}

impl ArmedOrchestrator {
    /// Trigger every binding matching a root-relative path.
    ///
    /// Returns the number of matching bindings.
    pub fn notify_changed(&self, path: &str) -> usize {
        self.notify_paths(&[path])
    }

    /// Trigger every binding matching any of `paths`, each at most once.
    pub fn notify_paths<S: AsRef<str>>(&self, paths: &[S]) -> usize {
        let mut triggered = 0;

        for (binding, trigger) in &self.inner.triggers {
            let Some(path) = paths.iter().map(|p| p.as_ref()).find(|p| binding.matches(p)) else {
                continue;
            };
            triggered += 1;

            match trigger.try_send(()) {
                Ok(()) => tracing::info!("{} changed, running {:?}", path, binding.patterns),
                Err(mpsc::error::TrySendError::Full(())) => {
                    tracing::debug!("{} changed, run already queued", path)
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    tracing::warn!("Watch worker for {:?} has stopped", binding.patterns)
                }
            }
        }

        triggered
    }

    /// Subscribe to completed binding runs.
    pub fn subscribe(&self) -> broadcast::Receiver<BindingRun> {
        self.inner.events.subscribe()
    }

    /// Feed filesystem changes below `root` into the bindings.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn watch_filesystem(&self, root: &Path) -> Result<FileWatcher, WatchError> {
        let (watcher, mut changes) =
            FileWatcher::new(root).map_err(|e| WatchError::Watch(e.to_string()))?;

        let armed = self.clone();
        tokio::spawn(async move {
            while let Some(paths) = changes.recv().await {
                armed.notify_paths(paths.as_slice());
            }
        });

        tracing::info!("Watching {} for changes", watcher.root().display());
        Ok(watcher)
    }
}
