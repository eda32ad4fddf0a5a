//! Payment records, client routes and record updates

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest status description stored without truncation
const MAX_DESCRIPTION_LEN: usize = 99;
/// Characters kept when a description is truncated
const TRUNCATED_DESCRIPTION_LEN: usize = 95;

/// One row of pending work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payer-side transaction ID
    pub transaction_id: String,
    /// Correlation key shared with the wrapper
    pub request_log_id: i64,
    pub overall_status: i32,
    pub service_id: i64,
    pub receipt_number: Option<String>,
    pub receiver_narration: Option<String>,
    pub first_send_time: Option<DateTime<Utc>>,
    pub last_send_time: Option<DateTime<Utc>>,
    pub next_send_time: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// Whether the status has never been pushed for this record
    pub fn is_first_send(&self) -> bool {
        self.first_send_time.is_none()
    }
}

/// Push configuration for one client code
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRoute {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub protocol: String,
    #[serde(alias = "http_method")]
    pub method: String,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub tls_cert_path: Option<String>,
}

impl ClientRoute {
    /// Whether both credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.trim().is_empty()
    }
}

impl std::fmt::Debug for ClientRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRoute")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"********")
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("tls_enabled", &self.tls_enabled)
            .field("tls_cert_path", &self.tls_cert_path)
            .finish()
    }
}

/// Routes keyed by client code, iterated in a stable order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, Arc<ClientRoute>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the route for a client code
    pub fn insert(&mut self, client_code: impl Into<String>, route: ClientRoute) {
        self.routes.insert(client_code.into(), Arc::new(route));
    }

    pub fn get(&self, client_code: &str) -> Option<&Arc<ClientRoute>> {
        self.routes.get(client_code)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in ascending client-code order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ClientRoute>)> {
        self.routes.iter().map(|(code, route)| (code.as_str(), route))
    }
}

impl FromIterator<(String, ClientRoute)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, ClientRoute)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (code, route) in iter {
            table.insert(code, route);
        }
        table
    }
}

/// Arguments of the "update record" operation
///
/// Reapplying the same update is idempotent: the first-send timestamp is only set when it
/// is still empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub correlation_id: i64,
    pub status_code: i32,
    pub description: String,
    pub next_send_interval_secs: i64,
    pub is_first_send: bool,
}

impl PaymentUpdate {
    /// Build an update, normalizing the description to a single safe-length line
    pub fn new(
        correlation_id: i64,
        status_code: i32,
        description: &str,
        next_send_interval_secs: i64,
        is_first_send: bool,
    ) -> Self {
        Self {
            correlation_id,
            status_code,
            description: normalize_description(description),
            next_send_interval_secs,
            is_first_send,
        }
    }

    /// Parameterized statement, binding status, description, interval and correlation ID
    pub fn parameterized_sql(&self) -> String {
        render_update("$1", "$2", "$3::bigint", "$4::bigint", self.is_first_send)
    }

    /// Fully materialized statement, safe to store as one line of text
    pub fn to_sql(&self) -> String {
        render_update(
            &self.status_code.to_string(),
            &quote_literal(&self.description),
            &self.next_send_interval_secs.to_string(),
            &self.correlation_id.to_string(),
            self.is_first_send,
        )
    }
}

/// Whether a stored line is an update statement that can be replayed
pub fn is_update_statement(line: &str) -> bool {
    line.trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("update"))
}

fn render_update(
    status: &str,
    description: &str,
    interval: &str,
    correlation_id: &str,
    is_first_send: bool,
) -> String {
    let first_send = if is_first_send {
        ", status_first_send = COALESCE(status_first_send, NOW())"
    } else {
        ""
    };
    format!(
        "UPDATE s_payments SET status_pushed = {status}, status_pushed_desc = {description}, \
         status_next_send = NOW() + ({interval} * INTERVAL '1 second'), \
         status_last_send = NOW(){first_send} WHERE request_log_id = {correlation_id}"
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn normalize_description(description: &str) -> String {
    let single_line: String = description
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if single_line.chars().count() > MAX_DESCRIPTION_LEN {
        let mut truncated: String = single_line.chars().take(TRUNCATED_DESCRIPTION_LEN).collect();
        truncated.push_str("...");
        truncated
    } else {
        single_line
    }
}
