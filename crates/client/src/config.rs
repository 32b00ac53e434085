//! Configuration for the HTTP backend.

use std::time::Duration;

/// Endpoints and limits for [`HttpBackend`](crate::HttpBackend).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URI of the flag polling service.
    pub base_uri: String,

    /// Base URI of the event ingestion service.
    pub events_uri: String,

    /// Maximum time to wait for the initial flag payload.
    pub ready_timeout: Duration,

    /// Maximum time a flush may take.
    pub flush_timeout: Duration,

    /// Queued analytics events that trigger a delivery before the next flush.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_uri: "https://sdk.launchdarkly.com".to_string(),
            events_uri: "https://events.launchdarkly.com".to_string(),
            ready_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
            event_capacity: 10_000,
        }
    }
}

impl ClientConfig {
    /// Point both services at one host, e.g. a relay proxy or a local stub.
    pub fn with_host(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            base_uri: uri.clone(),
            events_uri: uri,
            ..Default::default()
        }
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = uri.into();
        self
    }

    pub fn with_events_uri(mut self, uri: impl Into<String>) -> Self {
        self.events_uri = uri.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub(crate) fn polling_url(&self) -> String {
        format!("{}/sdk/latest-all", self.base_uri.trim_end_matches('/'))
    }

    pub(crate) fn bulk_url(&self) -> String {
        format!("{}/bulk", self.events_uri.trim_end_matches('/'))
    }
}
