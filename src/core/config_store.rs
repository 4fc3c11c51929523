//! The single authoritative holder of the live [`ConfigSnapshot`].
//!
//! Readers call [`ConfigStore::current`], a lock-free `ArcSwap` load that
//! always yields one complete snapshot. Writers go through
//! [`ConfigStore::publish`] (or [`ConfigStore::apply_document`], which parses
//! and validates first); publishes are serialized so generations increase by
//! exactly one per accepted document.
//!
//! Subscribers each get a private queue drained by a dedicated task, so a
//! slow subscriber never overlaps with itself and never delays a publish.
use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::{
    config::{
        error::ConfigError,
        loader::{RawDocument, parse_document},
    },
    core::snapshot::ConfigSnapshot,
};

pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
    publish_lock: Mutex<()>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Arc<ConfigSnapshot>>>>,
}

impl ConfigStore {
    /// A store serving the empty generation-zero snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(ConfigSnapshot::empty())
    }

    pub fn with_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            publish_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// The snapshot in force right now. Never blocks.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Atomically replace the current snapshot and notify subscribers.
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let generation = self.current.load().generation() + 1;
        let snapshot = Arc::new(snapshot.with_generation(generation));
        self.current.store(snapshot.clone());

        tracing::info!(
            generation,
            routes = snapshot.routes().len(),
            "Published configuration snapshot"
        );

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());

        snapshot
    }

    /// Parse, validate and publish a raw document.
    ///
    /// On any failure the previous snapshot stays in force. Re-delivering the
    /// document that produced the current snapshot is a no-op.
    pub fn apply_document(&self, raw: &RawDocument) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let digest = raw.digest();
        let current = self.current();
        if current.digest() == Some(digest) {
            tracing::debug!(
                origin = %raw.origin,
                generation = current.generation(),
                "Configuration unchanged, skipping publish"
            );
            return Ok(current);
        }

        let snapshot = parse_document(raw)
            .and_then(|doc| ConfigSnapshot::build(&doc))
            .inspect_err(|e| {
                tracing::warn!(
                    origin = %raw.origin,
                    generation = current.generation(),
                    "Rejected configuration document, keeping current snapshot: {e}"
                );
            })?;

        Ok(self.publish(snapshot.with_digest(digest)))
    }

    /// Invoke `callback` once per successful publish, never concurrently with
    /// itself. Must be called from within a Tokio runtime.
    pub fn subscribe<F, Fut>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<ConfigSnapshot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);

        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                callback(snapshot).await;
            }
        })
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
