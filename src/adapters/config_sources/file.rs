use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::loader::{RawDocument, read_document},
    ports::config_source::ConfigSource,
};

/// Gateway document on local disk, watched for changes.
///
/// The parent directory is watched rather than the file itself so that
/// editors replacing the file via rename are still noticed.
pub struct FileConfigSource {
    path: PathBuf,
    // Kept alive for as long as the source exists.
    _watcher: notify::RecommendedWatcher,
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel(1);

        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path: {}", path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()))
                        {
                            tracing::debug!(kind = ?event.kind, "Gateway document changed on disk");
                            // A pending signal already covers this change.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {e}"),
                }
            })
            .wrap_err("Failed to create file watcher")?;

        let watch_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch directory {}", watch_dir.display()))?;

        Ok(Self {
            path,
            _watcher: watcher,
            update_rx: Mutex::new(Some(rx)),
        })
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> Result<RawDocument> {
        read_document(&self.path).await
    }

    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        self.update_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
