//! hotgate - an API gateway core with hot-swappable configuration.
//!
//! Every request runs through an ordered chain of policy filters (IP
//! whitelist, rate limiting, authentication, circuit breaking) against one
//! immutable configuration snapshot, then is forwarded to a backend chosen
//! round-robin from the matched route.
//!
//! # Features
//! - Ant-style path patterns (`/api/**`, `/users/{id}`), most specific first
//! - Atomic configuration snapshots: a request never sees a half-applied reload
//! - File (watched) and HTTP (polled) configuration sources with validation
//! - Token-bucket rate limiting at global, per-route and per-client scope
//! - Per-route count-based circuit breakers with slow-call detection
//! - Fail-closed bearer-token verification against an external auth service
//! - Structured logging via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use hotgate::{ConfigStore, GatewayService, HttpClientAdapter, config::RawDocument};
//!
//! # async fn run() -> eyre::Result<()> {
//! let store = Arc::new(ConfigStore::new());
//! store.apply_document(&RawDocument::yaml(
//!     "routes: [{id: users, pathPattern: /users/**, targets: [http://localhost:3000]}]",
//! ))?;
//! let gateway = GatewayService::new(store, Arc::new(HttpClientAdapter::new()?));
//! // Hand `gateway` to the HttpHandler adapter (see the binary crate).
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! business logic inside `core`.
//!
//! # Error Handling
//! Request-path failures are typed (`GatewayError`, `DenyReason`) and always
//! become a JSON error response. Startup and I/O paths return `eyre::Result<T>`
//! with context attached.
//!
//! # Concurrency & Data Structures
//! The live snapshot sits in an `arc_swap::ArcSwap`. Shared mutable maps
//! (client buckets, breakers) use `scc::HashMap`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileConfigSource, HttpClientAdapter, HttpConfigSource, HttpHandler},
    core::{ConfigStore, GatewayService},
    ports::{config_source::ConfigSource, http_client::HttpClient},
};
