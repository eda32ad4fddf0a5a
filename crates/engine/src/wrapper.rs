//! HTTP client for the push wrapper
//!
//! The wrapper performs the client-specific delivery. It takes a form-encoded POST and
//! answers with a single line of JSON:
//!
//! ```text
//! {"statusCode": 1, "statusDescription": "...", "beepTransactionID": 9001, "payerTransactionID": "TX-1"}
//! ```
//!
//! Only `statusCode` is required.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Wrapper invocation errors
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    /// HTTP client could not be built
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    /// Connection, timeout or body read failure
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Reply was not the expected JSON
    #[error("malformed reply {body:?}: {source}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Form fields posted to the wrapper
#[derive(Clone, Serialize)]
pub struct WrapperRequest {
    pub url: String,
    #[serde(rename = "clientCode")]
    pub client_code: String,
    pub method: String,
    pub protocol: String,
    #[serde(rename = "externalUsername")]
    pub username: String,
    #[serde(rename = "externalPassword")]
    pub password: String,
    #[serde(rename = "serviceID")]
    pub service_id: i64,
    /// `1` when the client endpoint uses TLS, `0` otherwise
    #[serde(rename = "sslEnabled")]
    pub tls_enabled: u8,
    #[serde(rename = "sslCertificatePath")]
    pub tls_cert_path: String,
    #[serde(rename = "beepTransactionID")]
    pub correlation_id: i64,
    #[serde(rename = "payerTransactionID")]
    pub transaction_id: String,
    #[serde(rename = "receiverNarration")]
    pub receiver_narration: String,
    #[serde(rename = "receiptNumber")]
    pub receipt_number: String,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    #[serde(rename = "statusDescription")]
    pub status_description: String,
}

impl std::fmt::Debug for WrapperRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperRequest")
            .field("url", &self.url)
            .field("client_code", &self.client_code)
            .field("method", &self.method)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &"********")
            .field("correlation_id", &self.correlation_id)
            .field("transaction_id", &self.transaction_id)
            .field("status_code", &self.status_code)
            .finish_non_exhaustive()
    }
}

/// Parsed wrapper reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WrapperReply {
    #[serde(rename = "statusCode", deserialize_with = "lenient_i64")]
    pub status_code: i64,
    #[serde(rename = "statusDescription", default)]
    pub status_description: Option<String>,
    /// Correlation ID echoed back by the wrapper
    #[serde(
        rename = "beepTransactionID",
        default,
        deserialize_with = "lenient_opt_i64"
    )]
    pub beep_transaction_id: Option<i64>,
    #[serde(
        rename = "payerTransactionID",
        default,
        deserialize_with = "lenient_opt_string"
    )]
    pub payer_transaction_id: Option<String>,
}

impl WrapperReply {
    /// Echoed correlation ID; a reply without one echoes 0
    pub fn echoed_correlation_id(&self) -> i64 {
        self.beep_transaction_id.unwrap_or(0)
    }

    /// Description to record, falling back to a generic one
    pub fn description(&self) -> &str {
        match self.status_description.as_deref() {
            Some(desc) if !desc.trim().is_empty() => desc,
            _ => "No status description from wrapper",
        }
    }

    /// Parse the first line of a reply body; an empty body yields `None`
    pub fn parse(body: &str) -> Result<Option<Self>, WrapperError> {
        let line = body.lines().next().unwrap_or_default().trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line)
            .map(Some)
            .map_err(|source| WrapperError::Decode {
                body: line.to_string(),
                source,
            })
    }
}

/// Client for the wrapper endpoint
#[derive(Debug, Clone)]
pub struct WrapperClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WrapperClient {
    /// Create a client with the configured connect and reply timeouts
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        reply_timeout: Duration,
    ) -> Result<Self, WrapperError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(reply_timeout)
            .build()
            .map_err(WrapperError::Client)?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one push and parse the reply
    ///
    /// `Ok(None)` means the wrapper answered with an empty body.
    pub async fn push(&self, request: &WrapperRequest) -> Result<Option<WrapperReply>, WrapperError> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(request)
            .send()
            .await
            .map_err(WrapperError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(WrapperError::Transport)?;
        debug!(
            correlation_id = request.correlation_id,
            http_status = %status,
            body = %body.trim(),
            "wrapper replied"
        );

        WrapperReply::parse(&body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(i64),
    Text(String),
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<NumberOrText>::deserialize(deserializer)?.map(|value| match value {
            NumberOrText::Number(n) => n.to_string(),
            NumberOrText::Text(s) => s,
        }),
    )
}
