use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::{Client, header::CONTENT_TYPE};
use tokio::sync::mpsc;

use crate::{
    config::loader::{DocumentFormat, RawDocument},
    ports::config_source::ConfigSource,
};

/// Gateway document served over HTTP and polled for changes.
///
/// The format follows the response `Content-Type` (JSON when it mentions
/// `json`, YAML otherwise). A change is a different content hash between
/// two polls.
pub struct HttpConfigSource {
    url: String,
    client: Client,
    poll_interval: Duration,
    watching: Mutex<bool>,
}

impl HttpConfigSource {
    pub fn new(url: impl Into<String>, poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to build HTTP client for config source")?;
        Ok(Self {
            url: url.into(),
            client,
            poll_interval,
            watching: Mutex::new(false),
        })
    }

    async fn fetch_from(client: &Client, url: &str) -> Result<RawDocument> {
        let response = client
            .get(url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to fetch configuration from {url}"))?
            .error_for_status()
            .wrap_err_with(|| format!("Configuration endpoint {url} returned an error"))?;

        let format = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(DocumentFormat::Yaml, DocumentFormat::from_content_type);
        let content = response
            .text()
            .await
            .wrap_err("Failed to read configuration body")?;
        Ok(RawDocument::new(content, format, url))
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<RawDocument> {
        Self::fetch_from(&self.client, &self.url).await
    }

    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        let mut watching = self.watching.lock().unwrap_or_else(PoisonError::into_inner);
        if *watching {
            return None;
        }
        *watching = true;

        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let url = self.url.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last_digest: Option<u64> = None;
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }

                match Self::fetch_from(&client, &url).await {
                    Ok(doc) => {
                        let digest = doc.digest();
                        match last_digest {
                            Some(last) if last != digest => {
                                tracing::info!(%url, "Remote configuration changed");
                                let _ = tx.try_send(());
                            }
                            _ => {}
                        }
                        last_digest = Some(digest);
                    }
                    Err(e) => tracing::warn!(%url, "Failed to poll remote configuration: {e:#}"),
                }
            }
        });

        Some(rx)
    }

    fn describe(&self) -> String {
        format!("url {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, http::header, response::IntoResponse, routing::get};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn polls_and_detects_changes() -> Result<()> {
        let body = Arc::new(Mutex::new(
            r#"{"routes":[{"id":"a","pathPattern":"/a/**","targets":["http://a"]}]}"#.to_string(),
        ));

        let state = body.clone();
        let app = Router::new().route(
            "/gateway",
            get(move || {
                let state = state.clone();
                async move {
                    let content = state.lock().unwrap().clone();
                    ([(header::CONTENT_TYPE, "application/json")], content).into_response()
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = HttpConfigSource::new(
            format!("http://{addr}/gateway"),
            Duration::from_millis(100),
        )?;
        let doc = source.fetch().await?;
        assert_eq!(doc.format, DocumentFormat::Json);
        assert!(doc.content.contains("\"a\""));

        let mut rx = source.watch().expect("first watch call");
        assert!(source.watch().is_none());

        // Let the poller record the initial digest.
        tokio::time::sleep(Duration::from_millis(250)).await;
        *body.lock().unwrap() =
            r#"{"routes":[{"id":"b","pathPattern":"/b/**","targets":["http://b"]}]}"#.to_string();

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(notification.is_ok(), "Timed out waiting for change notification");

        let doc = source.fetch().await?;
        assert!(doc.content.contains("\"b\""));
        Ok(())
    }
}
