//! HTTP implementation of the flagging backend.
//!
//! `connect` downloads the flag payload once from the polling endpoint;
//! evaluations run locally against that snapshot (see [`crate::eval`]).
//! Each new context is reported once in an index event, tracked or
//! experiment evaluations as feature events, and custom events reference
//! contexts by key. Events are posted to the bulk endpoint on flush, and
//! earlier whenever the buffer reaches its capacity.

pub mod types;

use crate::config::ClientConfig;
use crate::eval::Evaluator;
use crate::events::{EventBuffer, FeatureRecord};
use async_trait::async_trait;
use flagsim_core::{BackendConnection, BackendError, FlagValue, FlaggingBackend};
use flagsim_types::MultiContext;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};
use types::{AllData, FlagData};

/// Header naming the analytics event schema version.
pub const EVENT_SCHEMA_HEADER: &str = "X-LaunchDarkly-Event-Schema";

/// Event schema version sent with every bulk post.
pub const EVENT_SCHEMA_VERSION: &str = "4";

/// Flagging backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpBackend {
    /// Create a backend with the given endpoints.
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flagsim/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn fetch_flags(&self, credential: &str) -> Result<AllData, BackendError> {
        let response = self
            .http
            .get(self.config.polling_url())
            .header(AUTHORIZATION, credential)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(BackendError::Unauthorized)
            }
            status if !status.is_success() => {
                return Err(BackendError::Unreachable(format!(
                    "flag polling returned {}",
                    status
                )))
            }
            _ => {}
        }

        response
            .json::<AllData>()
            .await
            .map_err(|e| BackendError::Unreachable(format!("invalid flag payload: {}", e)))
    }
}

#[async_trait]
impl FlaggingBackend for HttpBackend {
    type Connection = HttpConnection;

    async fn connect(&self, credential: &str) -> Result<Self::Connection, BackendError> {
        let timeout = self.config.ready_timeout;
        let data = tokio::time::timeout(timeout, self.fetch_flags(credential))
            .await
            .map_err(|_| BackendError::NotReady(timeout))??;

        info!(flags = data.flags.len(), "Connected to flagging backend");

        Ok(HttpConnection {
            http: self.http.clone(),
            config: self.config.clone(),
            credential: credential.to_string(),
            flags: data.flags,
            buffer: EventBuffer::new(self.config.event_capacity),
            closed: false,
        })
    }
}

/// A connection holding one flag snapshot and one event buffer.
pub struct HttpConnection {
    http: reqwest::Client,
    config: ClientConfig,
    credential: String,
    flags: HashMap<String, FlagData>,
    buffer: EventBuffer,
    closed: bool,
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("config", &self.config)
            .field("flags", &self.flags.len())
            .field("pending", &self.buffer.pending())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl HttpConnection {
    /// Events waiting for the next delivery, not counting the summary.
    pub fn pending_events(&self) -> usize {
        self.buffer.pending()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn post_bulk(&self) -> Result<(), BackendError> {
        let payload = self.buffer.payload();
        let response = self
            .http
            .post(self.config.bulk_url())
            .header(AUTHORIZATION, self.credential.as_str())
            .header(EVENT_SCHEMA_HEADER, EVENT_SCHEMA_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Delivery(format!(
                "event endpoint returned {}",
                status
            )));
        }

        debug!(events = payload.len(), "Delivered event payload");
        Ok(())
    }

    /// Post everything buffered. On failure the events stay queued.
    async fn deliver(&mut self) -> Result<(), BackendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let timeout = self.config.flush_timeout;
        tokio::time::timeout(timeout, self.post_bulk())
            .await
            .map_err(|_| BackendError::Delivery(format!("flush timed out after {:?}", timeout)))??;

        info!(events = self.buffer.pending(), "Delivered events");
        self.buffer.clear();
        Ok(())
    }
}

#[async_trait]
impl BackendConnection for HttpConnection {
    async fn evaluate(
        &mut self,
        flag_key: &str,
        context: &MultiContext,
        fallback: FlagValue,
    ) -> FlagValue {
        if self.closed {
            return fallback;
        }
        self.buffer.notice_context(context);

        let value = match self.flags.get(flag_key) {
            Some(flag) => {
                let evaluation = Evaluator::new(&self.flags).evaluate(flag, context);

                for prereq in &evaluation.prerequisites {
                    let Some(prereq_flag) = self.flags.get(&prereq.flag_key) else {
                        continue;
                    };
                    let value = prereq.detail.value.clone().unwrap_or(FlagValue::Null);
                    self.buffer.record_evaluation(
                        &prereq.flag_key,
                        prereq.detail.variation,
                        Some(prereq.version),
                        &value,
                        &FlagValue::Null,
                    );
                    if prereq_flag.is_tracked(&prereq.detail.reason) {
                        self.buffer.push_feature(
                            context,
                            FeatureRecord {
                                flag: prereq_flag,
                                detail: &prereq.detail,
                                value: &value,
                                default: &FlagValue::Null,
                                prereq_of: Some(prereq.prereq_of.as_str()),
                            },
                        );
                    }
                }

                let detail = &evaluation.detail;
                let value = detail.value.clone().unwrap_or_else(|| fallback.clone());
                self.buffer.record_evaluation(
                    flag_key,
                    detail.variation,
                    Some(flag.version),
                    &value,
                    &fallback,
                );
                if flag.is_tracked(&detail.reason) {
                    self.buffer.push_feature(
                        context,
                        FeatureRecord {
                            flag,
                            detail,
                            value: &value,
                            default: &fallback,
                            prereq_of: None,
                        },
                    );
                }
                debug!(flag_key, value = %value, reason = ?detail.reason, "Evaluated");
                value
            }
            None => {
                debug!(flag_key, "Unknown flag, serving fallback");
                self.buffer
                    .record_evaluation(flag_key, None, None, &fallback, &fallback);
                fallback
            }
        };

        // Evaluation cannot fail; a failed delivery keeps the events queued
        // and surfaces from the next track or flush.
        if self.buffer.is_full() {
            if let Err(e) = self.deliver().await {
                warn!(error = %e, pending = self.buffer.pending(), "Event delivery failed");
            }
        }
        value
    }

    async fn track(
        &mut self,
        event_name: &str,
        context: &MultiContext,
    ) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        self.buffer.push_custom(event_name, context);
        if self.buffer.is_full() {
            debug!(capacity = self.config.event_capacity, "Event buffer full, delivering");
            self.deliver().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        self.deliver().await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.buffer.is_empty() {
            warn!(
                pending = self.buffer.pending(),
                "Closing connection with undelivered events"
            );
        }
        debug!("Connection closed");
    }
}
