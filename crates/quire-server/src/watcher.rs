//! File watching for watch bindings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// How long a burst of events is gathered before it is delivered.
const SETTLE: Duration = Duration::from_millis(50);

/// File watcher for detecting changes below a root directory.
///
/// Watching stops when the watcher is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Watch `root` recursively.
    ///
    /// Returns the watcher and a channel receiving batches of changed paths,
    /// relative to `root` with forward slashes.
    pub fn new(root: &Path) -> Result<(Self, mpsc::Receiver<Vec<String>>), std::io::Error> {
        let root = root.canonicalize()?;
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (batch_tx, batch_rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                if is_change(&event.kind) {
                    for path in event.paths {
                        let _ = raw_tx.send(path);
                    }
                }
            }
        })
        .map_err(std::io::Error::other)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(std::io::Error::other)?;

        let prefix = root.clone();
        tokio::spawn(async move {
            while let Some(first) = raw_rx.recv().await {
                let mut batch = Vec::new();
                push_relative(&mut batch, &prefix, &first);

                // Editors emit several events per save; deliver them together.
                while let Ok(Some(path)) = tokio::time::timeout(SETTLE, raw_rx.recv()).await {
                    push_relative(&mut batch, &prefix, &path);
                }

                if !batch.is_empty() && batch_tx.send(batch).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            batch_rx,
        ))
    }

    /// The canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn push_relative(batch: &mut Vec<String>, root: &Path, path: &Path) {
    if let Some(rel) = relative_path(root, path) {
        if !batch.contains(&rel) {
            batch.push(rel);
        }
    }
}

/// `path` relative to `root` with forward slashes, if it is inside it.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}
