//! Push job: deliver one record's status and write the outcome back
//!
//! A job never fails its caller. Every error along the way is mapped to a push status or,
//! when the database refuses the write, to a retry log entry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::model::{ClientRoute, PaymentRecord, PaymentUpdate};
use crate::persistence::PaymentStore;
use crate::retry_log::RetryLog;
use crate::status::{PushStatus, TargetStatus};
use crate::wrapper::{WrapperClient, WrapperError, WrapperRequest};

const UNMAPPED_DESCRIPTION: &str =
    "The overall status provided cannot be processed in this situation";

/// Dependencies shared by every job of a cycle
pub struct JobContext {
    pub store: Arc<dyn PaymentStore>,
    pub wrapper: WrapperClient,
    pub config: Arc<EngineConfig>,
    pub retry_log: Arc<RetryLog>,
}

/// Outcome of one push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub correlation_id: i64,
    /// Code the client was told
    pub target_status_code: i32,
    /// Push status written back to the record
    pub push_status: PushStatus,
    pub status_description: String,
}

/// What a job did with its record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Wrapper called and outcome written to the record
    Updated(PushResult),
    /// Outcome could not be written and went to the retry log
    Deferred(PushResult),
    /// Overall status is not deliverable; record marked unprocessed without a push
    Unmapped,
    /// Route has no credentials; record left pending
    Skipped,
}

/// One record bound to its client route
#[derive(Debug, Clone)]
pub struct PushJob {
    pub client_code: String,
    pub route: Arc<ClientRoute>,
    pub record: PaymentRecord,
}

impl PushJob {
    pub fn new(client_code: impl Into<String>, route: Arc<ClientRoute>, record: PaymentRecord) -> Self {
        Self {
            client_code: client_code.into(),
            route,
            record,
        }
    }

    /// Run the job to completion
    #[instrument(
        name = "push_job",
        skip_all,
        fields(client_code = %self.client_code, correlation_id = self.record.request_log_id)
    )]
    pub async fn run(self, ctx: Arc<JobContext>) -> JobOutcome {
        let codes = &ctx.config.status_codes;

        let Some(target) = codes.target_for(self.record.overall_status) else {
            warn!(
                overall_status = self.record.overall_status,
                "overall status is not deliverable, marking record unprocessed"
            );
            let update = self.update(&ctx, codes.unprocessed, UNMAPPED_DESCRIPTION);
            persist(&ctx, &update).await;
            return JobOutcome::Unmapped;
        };

        if !self.route.has_credentials() {
            warn!("route has no credentials, leaving record pending");
            return JobOutcome::Skipped;
        }

        let request = self.request(target);
        let (mut status, mut description) = match ctx.wrapper.push(&request).await {
            Ok(Some(reply)) => {
                let status = codes.classify(&reply, self.record.request_log_id);
                let description = match status {
                    PushStatus::Escalated => format!(
                        "Correlation ID mismatch: wrapper echoed {}, expected {}. {}",
                        reply.echoed_correlation_id(),
                        self.record.request_log_id,
                        reply.description()
                    ),
                    _ => reply.description().to_string(),
                };
                (status, description)
            }
            Ok(None) => (
                PushStatus::Unprocessed,
                "Empty response from wrapper".to_string(),
            ),
            Err(e @ WrapperError::Decode { .. }) => {
                warn!(error = %e, "wrapper reply could not be parsed");
                (
                    PushStatus::Unprocessed,
                    "Invalid response from wrapper".to_string(),
                )
            }
            Err(e) => {
                warn!(error = %e, "wrapper call failed");
                (
                    PushStatus::Unprocessed,
                    format!("Failed to invoke wrapper: {e}"),
                )
            }
        };

        if status == PushStatus::Unprocessed && self.ack_window_elapsed(&ctx.config) {
            info!("acknowledgement window elapsed, marking record failed");
            status = PushStatus::Failed;
            description = format!("Acknowledgement window elapsed. {description}");
        }

        let update = self.update(&ctx, status.code(codes), &description);
        let result = PushResult {
            correlation_id: self.record.request_log_id,
            target_status_code: target.code,
            push_status: status,
            status_description: update.description.clone(),
        };

        debug!(push_status = %status, "push finished");
        if persist(&ctx, &update).await {
            JobOutcome::Updated(result)
        } else {
            JobOutcome::Deferred(result)
        }
    }

    fn request(&self, target: TargetStatus) -> WrapperRequest {
        let route = &self.route;
        let record = &self.record;
        WrapperRequest {
            url: route.url.clone(),
            client_code: self.client_code.clone(),
            method: route.method.clone(),
            protocol: route.protocol.clone(),
            username: route.username.clone(),
            password: route.password.clone(),
            service_id: record.service_id,
            tls_enabled: u8::from(route.tls_enabled),
            tls_cert_path: route.tls_cert_path.clone().unwrap_or_default(),
            correlation_id: record.request_log_id,
            transaction_id: record.transaction_id.clone(),
            receiver_narration: record.receiver_narration.clone().unwrap_or_default(),
            receipt_number: record.receipt_number.clone().unwrap_or_default(),
            status_code: target.code,
            status_description: target.description.to_string(),
        }
    }

    /// The update always targets this job's own correlation ID, never the echoed one
    fn update(&self, ctx: &JobContext, status_code: i32, description: &str) -> PaymentUpdate {
        PaymentUpdate::new(
            self.record.request_log_id,
            status_code,
            description,
            ctx.config.next_send_interval.as_secs() as i64,
            self.record.is_first_send(),
        )
    }

    fn ack_window_elapsed(&self, config: &EngineConfig) -> bool {
        self.record.first_send_time.is_some_and(|first| {
            (Utc::now() - first)
                .to_std()
                .is_ok_and(|elapsed| elapsed > config.ack_timeout)
        })
    }
}

/// Write an update, falling back to the retry log; returns whether the database took it
async fn persist(ctx: &JobContext, update: &PaymentUpdate) -> bool {
    match ctx.store.update_payment(update).await {
        Ok(0) => {
            warn!(correlation_id = update.correlation_id, "update matched no record");
            true
        }
        Ok(_) => true,
        Err(e) => {
            error!(
                correlation_id = update.correlation_id,
                error = %e,
                "failed to update record, writing to retry log"
            );
            if let Err(log_err) = ctx.retry_log.append(&update.to_sql()).await {
                error!(
                    correlation_id = update.correlation_id,
                    error = %log_err,
                    statement = %update.to_sql(),
                    "failed to write retry log, update is lost"
                );
            }
            false
        }
    }
}
