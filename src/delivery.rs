//! Delivery of encoded scrobbles to the remote service
//!
//! [`Deliver`] is the seam between the submission worker and the network:
//! the worker only sees a [`DeliveryOutcome`], which it maps onto its
//! retry/suspend behavior. Tests substitute scripted implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Error, Result};

/// Where and as whom to submit scrobbles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    /// Service API base URL, e.g. `http://api.gravifon.org/v1`
    pub endpoint_url: String,
    /// ASCII-only username
    pub username: String,
    /// ASCII-only password
    pub password: String,
}

impl DeliveryTarget {
    /// Full URL scrobbles are POSTed to
    #[must_use]
    pub fn scrobbles_url(&self) -> String {
        format!("{}/scrobbles", self.endpoint_url.trim_end_matches('/'))
    }
}

/// Classified result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Service acknowledged receipt; the entry may be removed
    Accepted,
    /// Network error, timeout or server-side failure; retry the same entry
    /// after backoff
    Transient(String),
    /// Bad credentials or malformed payload; suspend submission until
    /// reconfigured, keep the entry queued
    Permanent(String),
}

/// One send attempt against the remote service
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, payload: &[u8], target: &DeliveryTarget) -> DeliveryOutcome;
}

/// HTTP POST delivery with basic-auth credentials
pub struct HttpDelivery {
    client: reqwest::Client,
}

impl HttpDelivery {
    /// Build the HTTP client with a bounded request timeout.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the underlying client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("scrobble-relay/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Deliver for HttpDelivery {
    async fn deliver(&self, payload: &[u8], target: &DeliveryTarget) -> DeliveryOutcome {
        let url = target.scrobbles_url();
        let response = self
            .client
            .post(&url)
            .basic_auth(&target.username, Some(&target.password))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                debug!(%url, %status, "scrobble submission response");
                classify_status(status)
            }
            Err(e) => DeliveryOutcome::Transient(e.to_string()),
        }
    }
}

/// Map an HTTP status onto a delivery outcome: 2xx accepted, 4xx permanent,
/// everything else transient.
fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Accepted
    } else if status.is_client_error() {
        DeliveryOutcome::Permanent(format!("service rejected scrobble: {status}"))
    } else {
        DeliveryOutcome::Transient(format!("service unavailable: {status}"))
    }
}
