//! Reload loop tying a [`ConfigSource`] to the [`ConfigStore`].
use std::{sync::Arc, time::Duration};

use eyre::Result;
use tokio::task::JoinHandle;

use crate::{
    core::{config_store::ConfigStore, snapshot::ConfigSnapshot},
    ports::config_source::ConfigSource,
};

/// Fetch the current document and try to publish it.
///
/// On failure the store keeps its current snapshot and the error is returned.
pub async fn reload_once(
    source: &dyn ConfigSource,
    store: &ConfigStore,
) -> Result<Arc<ConfigSnapshot>> {
    let raw = source.fetch().await?;
    let snapshot = store.apply_document(&raw)?;
    Ok(snapshot)
}

/// Watch `source` and republish on every change.
///
/// Notifications are debounced on the trailing edge: after the first signal
/// the loop waits `debounce`, drains whatever arrived meanwhile, then
/// reloads once. Returns `None` when the source cannot be watched.
pub fn spawn_config_watcher(
    source: Arc<dyn ConfigSource>,
    store: Arc<ConfigStore>,
    debounce: Duration,
) -> Option<JoinHandle<()>> {
    let Some(mut rx) = source.watch() else {
        tracing::warn!(source = %source.describe(), "Config source cannot be watched, hot reload disabled");
        return None;
    };

    tracing::info!(
        source = %source.describe(),
        debounce_ms = debounce.as_millis() as u64,
        "Watching configuration for changes"
    );

    Some(tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(debounce).await;
            while rx.try_recv().is_ok() {}

            match reload_once(source.as_ref(), &store).await {
                Ok(snapshot) => tracing::debug!(
                    generation = snapshot.generation(),
                    "Configuration reload processed"
                ),
                Err(e) => tracing::error!(
                    source = %source.describe(),
                    generation = store.current().generation(),
                    "Configuration reload failed, keeping current snapshot: {e:#}"
                ),
            }
        }
        tracing::info!(source = %source.describe(), "Config watch channel closed, stopping reloads");
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::loader::RawDocument;

    struct ScriptedSource {
        document: Mutex<String>,
        fetches: Mutex<usize>,
        rx: Mutex<Option<mpsc::Receiver<()>>>,
    }

    #[async_trait]
    impl ConfigSource for ScriptedSource {
        async fn fetch(&self) -> Result<RawDocument> {
            *self.fetches.lock().unwrap() += 1;
            Ok(RawDocument::yaml(self.document.lock().unwrap().clone()))
        }

        fn watch(&self) -> Option<mpsc::Receiver<()>> {
            self.rx.lock().unwrap().take()
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn doc(id: &str) -> String {
        format!("routes:\n  - id: {id}\n    pathPattern: /{id}/**\n    targets: [\"http://{id}\"]\n")
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_into_one_reload() {
        let (tx, rx) = mpsc::channel(8);
        let source = Arc::new(ScriptedSource {
            document: Mutex::new(doc("a")),
            fetches: Mutex::new(0),
            rx: Mutex::new(Some(rx)),
        });
        let store = Arc::new(ConfigStore::new());
        let handle = spawn_config_watcher(source.clone(), store.clone(), Duration::from_millis(2000))
            .expect("watchable");

        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(*source.fetches.lock().unwrap(), 1);
        assert_eq!(store.current().generation(), 1);
        assert!(store.current().route("a").is_some());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_document_keeps_previous_snapshot() {
        let (tx, rx) = mpsc::channel(8);
        let source = Arc::new(ScriptedSource {
            document: Mutex::new(doc("a")),
            fetches: Mutex::new(0),
            rx: Mutex::new(Some(rx)),
        });
        let store = Arc::new(ConfigStore::new());
        reload_once(source.as_ref(), &store).await.unwrap();
        let _handle = spawn_config_watcher(source.clone(), store.clone(), Duration::from_millis(10))
            .expect("watchable");

        *source.document.lock().unwrap() = "routes:\n  - id: broken\n".to_string();
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*source.fetches.lock().unwrap(), 2);
        assert_eq!(store.current().generation(), 1);
        assert!(store.current().route("a").is_some());
    }

    #[tokio::test]
    async fn unwatchable_source_is_reported() {
        let source = Arc::new(ScriptedSource {
            document: Mutex::new(String::new()),
            fetches: Mutex::new(0),
            rx: Mutex::new(None),
        });
        assert!(spawn_config_watcher(source, Arc::new(ConfigStore::new()), Duration::ZERO).is_none());
    }
}
