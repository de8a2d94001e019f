//! Product analytics events
//!
//! Events are fire-and-forget: a failed or skipped delivery is logged at
//! debug level and never reaches the pipeline. Short-lived callers such as the
//! CLI call [`Telemetry::flush`] before exiting so pending deliveries are not
//! cut off by runtime shutdown.

use crate::config::TelemetryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Events emitted over a session's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// A file passed validation and a cutout run is starting
    ImageUpload {
        name: String,
        size: u64,
        media_type: String,
    },
    ProcessingComplete,
    ProcessingError {
        error: String,
    },
    ResetClick,
}

impl TelemetryEvent {
    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ImageUpload { .. } => "image_upload",
            Self::ProcessingComplete => "processing_complete",
            Self::ProcessingError { .. } => "processing_error",
            Self::ResetClick => "reset_click",
        }
    }

    /// Event properties as a JSON object
    #[must_use]
    pub fn properties(&self) -> Map<String, Value> {
        let value = match self {
            Self::ImageUpload {
                name,
                size,
                media_type,
            } => json!({ "name": name, "size": size, "type": media_type }),
            Self::ProcessingError { error } => json!({ "error": error }),
            Self::ProcessingComplete | Self::ResetClick => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Sink for telemetry events
#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Record an event without waiting for delivery
    fn track(&self, event: TelemetryEvent);

    /// Attach properties to a user identity
    fn identify(&self, user_id: &str, properties: Map<String, Value>) {
        let _ = (user_id, properties);
    }

    /// Wait up to `timeout` for deliveries still in flight
    async fn flush(&self, _timeout: Duration) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpTelemetry;

impl Telemetry for NoOpTelemetry {
    fn track(&self, _event: TelemetryEvent) {}
}

/// Sends events to a PostHog-compatible capture endpoint
#[derive(Debug, Clone)]
pub struct PosthogTelemetry {
    client: Client,
    api_key: String,
    endpoint: String,
    distinct_id: String,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PosthogTelemetry {
    #[must_use]
    pub fn new<K: Into<String>>(api_key: K, host: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: format!("{}/capture/", host.trim_end_matches('/')),
            distinct_id: uuid::Uuid::new_v4().to_string(),
            pending: Arc::default(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request body for one capture call
    #[must_use]
    pub fn payload(&self, event: &str, properties: Map<String, Value>) -> Value {
        json!({
            "api_key": self.api_key,
            "event": event,
            "distinct_id": self.distinct_id,
            "properties": properties,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn send(&self, body: Value) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime, dropping telemetry event");
            return;
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let task = handle.spawn(async move {
            match client.post(&endpoint).json(&body).send().await {
                Ok(response) if !response.status().is_success() => {
                    log::debug!("Telemetry endpoint answered {}", response.status());
                },
                Ok(_) => {},
                Err(e) => log::debug!("Telemetry delivery failed: {}", e),
            }
        });

        let mut pending = self.lock_pending();
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Deliveries spawned and not yet finished
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_pending()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Telemetry for PosthogTelemetry {
    fn track(&self, event: TelemetryEvent) {
        log::trace!("Telemetry event {}", event.name());
        self.send(self.payload(event.name(), event.properties()));
    }

    fn identify(&self, user_id: &str, properties: Map<String, Value>) {
        let mut body = self.payload("$identify", Map::new());
        body["distinct_id"] = Value::String(user_id.to_string());
        body["$set"] = Value::Object(properties);
        self.send(body);
    }

    async fn flush(&self, timeout: Duration) {
        let tasks = std::mem::take(&mut *self.lock_pending());
        if tasks.is_empty() {
            return;
        }
        let count = tasks.len();
        if tokio::time::timeout(timeout, futures_util::future::join_all(tasks))
            .await
            .is_err()
        {
            log::debug!("Gave up waiting for {} telemetry deliveries", count);
        }
    }
}

/// PostHog client when an API key is configured, no-op otherwise
#[must_use]
pub fn telemetry_from_config(config: &TelemetryConfig) -> Arc<dyn Telemetry> {
    match config.api_key.as_deref() {
        Some(key) if config.is_enabled() => {
            log::debug!("Telemetry enabled, sending to {}", config.host);
            Arc::new(PosthogTelemetry::new(key, &config.host))
        },
        _ => {
            log::debug!("Telemetry API key not configured, analytics disabled");
            Arc::new(NoOpTelemetry)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_and_properties() {
        let upload = TelemetryEvent::ImageUpload {
            name: "cat.png".to_string(),
            size: 1024,
            media_type: "image/png".to_string(),
        };
        assert_eq!(upload.name(), "image_upload");
        let props = upload.properties();
        assert_eq!(props["name"], "cat.png");
        assert_eq!(props["size"], 1024);
        assert_eq!(props["type"], "image/png");

        let error = TelemetryEvent::ProcessingError {
            error: "boom".to_string(),
        };
        assert_eq!(error.name(), "processing_error");
        assert_eq!(error.properties()["error"], "boom");

        assert_eq!(TelemetryEvent::ProcessingComplete.name(), "processing_complete");
        assert!(TelemetryEvent::ResetClick.properties().is_empty());
    }

    #[test]
    fn test_posthog_payload() {
        let client = PosthogTelemetry::new("phc_key", "https://eu.posthog.com/");
        assert_eq!(client.endpoint(), "https://eu.posthog.com/capture/");

        let body = client.payload("reset_click", Map::new());
        assert_eq!(body["api_key"], "phc_key");
        assert_eq!(body["event"], "reset_click");
        assert!(body["distinct_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_track_without_runtime_is_silent() {
        let client = PosthogTelemetry::new("phc_key", "http://127.0.0.1:9");
        client.track(TelemetryEvent::ResetClick);
        client.identify("user-1", Map::new());
    }

    #[tokio::test]
    async fn test_flush_waits_for_delivery() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !String::from_utf8_lossy(&request).contains("processing_complete") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let client = PosthogTelemetry::new("phc_key", &host);
        client.track(TelemetryEvent::ProcessingComplete);
        client.flush(Duration::from_secs(5)).await;
        assert_eq!(client.pending(), 0);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /capture/"));
        assert!(request.contains("processing_complete"));
    }

    #[tokio::test]
    async fn test_flush_is_bounded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        // Accepts nothing, so the request never completes
        let client = PosthogTelemetry::new("phc_key", &host);
        client.track(TelemetryEvent::ResetClick);

        let started = std::time::Instant::now();
        client.flush(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_from_config() {
        let disabled = TelemetryConfig::default();
        let sink = telemetry_from_config(&disabled);
        sink.track(TelemetryEvent::ProcessingComplete);

        let blank = TelemetryConfig {
            api_key: Some("  ".to_string()),
            ..TelemetryConfig::default()
        };
        assert!(!blank.is_enabled());

        let enabled = TelemetryConfig {
            api_key: Some("phc_key".to_string()),
            ..TelemetryConfig::default()
        };
        assert!(enabled.is_enabled());
    }
}
