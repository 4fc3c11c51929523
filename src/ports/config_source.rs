use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::loader::RawDocument;

/// Where gateway documents come from.
///
/// A source hands out raw text; parsing, validation and publishing are the
/// store's business.
#[async_trait]
pub trait ConfigSource: Send + Sync + 'static {
    /// Fetch the current document.
    async fn fetch(&self) -> Result<RawDocument>;

    /// Change notifications, if the source can produce them. Each message
    /// means "something may have changed, fetch again". Called once; later
    /// calls return `None`.
    fn watch(&self) -> Option<mpsc::Receiver<()>>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}
