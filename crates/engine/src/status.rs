//! Status code mapping and reply classification
//!
//! Two tables meet here: the overall transaction status a record carries, which decides what
//! the client is told, and the push status written back to the record once the wrapper has
//! replied.

use serde::{Deserialize, Serialize};

use crate::wrapper::WrapperReply;

/// Numeric codes used by the transactional store and the wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusCodes {
    /// Push status: not yet delivered, picked up again when due
    pub unprocessed: i32,
    /// Push status: delivered and acknowledged
    pub processed: i32,
    /// Push status: needs manual reconciliation
    pub escalated: i32,
    /// Push status: gave up after the ack timeout
    pub failed: i32,

    /// Overall status: accepted by the merchant
    pub payment_accepted: i32,
    /// Overall status: rejected by the merchant
    pub payment_rejected: i32,
    /// Overall status: escalated
    pub payment_escalated: i32,
    /// Overall status: pending reversal
    pub pending_reversal: i32,
    /// Overall status: unknown outcome
    pub unknown_status: i32,
    /// Overall status: reconciled by hand as successful
    pub manually_successful: i32,
    /// Overall status: reconciled by hand as failed
    pub manually_failed: i32,

    /// Code sent to the client for an accepted payment
    pub accepted_push: i32,
    /// Code sent to the client for a rejected payment
    pub rejected_push: i32,

    /// Wrapper reply code for a delivered status
    pub successfully_delivered: i64,
    /// Wrapper reply code for a failed delivery
    pub failed_to_deliver: i64,
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self {
            unprocessed: 0,
            processed: 1,
            escalated: 2,
            failed: 3,
            payment_accepted: 140,
            payment_rejected: 141,
            payment_escalated: 219,
            pending_reversal: 220,
            unknown_status: 103,
            manually_successful: 183,
            manually_failed: 180,
            accepted_push: 140,
            rejected_push: 141,
            successfully_delivered: 1,
            failed_to_deliver: 0,
        }
    }
}

/// What the client is told about a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStatus {
    pub code: i32,
    pub description: &'static str,
}

/// Push status written back to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    Unprocessed,
    Processed,
    Escalated,
    Failed,
}

impl PushStatus {
    /// Numeric code for this status
    pub fn code(self, codes: &StatusCodes) -> i32 {
        match self {
            Self::Unprocessed => codes.unprocessed,
            Self::Processed => codes.processed,
            Self::Escalated => codes.escalated,
            Self::Failed => codes.failed,
        }
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprocessed => write!(f, "unprocessed"),
            Self::Processed => write!(f, "processed"),
            Self::Escalated => write!(f, "escalated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StatusCodes {
    /// Overall statuses that map to a client-facing status
    pub fn deliverable_statuses(&self) -> Vec<i32> {
        let mut statuses = vec![
            self.payment_accepted,
            self.payment_rejected,
            self.payment_escalated,
            self.pending_reversal,
            self.unknown_status,
            self.manually_successful,
            self.manually_failed,
        ];
        statuses.sort_unstable();
        statuses.dedup();
        statuses
    }

    /// Map an overall status to what the client is told
    ///
    /// Returns `None` for statuses that are not a deliverable outcome.
    pub fn target_for(&self, overall_status: i32) -> Option<TargetStatus> {
        if overall_status == self.payment_accepted {
            Some(TargetStatus {
                code: self.accepted_push,
                description: "Payment has been accepted by merchant.",
            })
        } else if overall_status == self.payment_rejected {
            Some(TargetStatus {
                code: self.rejected_push,
                description: "Payment has been rejected by merchant.",
            })
        } else if overall_status == self.pending_reversal
            || overall_status == self.payment_escalated
            || overall_status == self.unknown_status
        {
            Some(TargetStatus {
                code: self.payment_escalated,
                description: "Payment has been escalated for manual reconciliation.",
            })
        } else if overall_status == self.manually_successful {
            Some(TargetStatus {
                code: self.manually_successful,
                description: "Payment has been manually reconciled and is accepted",
            })
        } else if overall_status == self.manually_failed {
            Some(TargetStatus {
                code: self.manually_failed,
                description: "Payment has been manually reconciled and is rejected",
            })
        } else {
            None
        }
    }

    /// Classify a parsed wrapper reply for the record with `correlation_id`
    ///
    /// An echoed correlation ID that differs from the request's wins over the reply code.
    /// A reply that echoes no ID is treated as echoing 0.
    pub fn classify(&self, reply: &WrapperReply, correlation_id: i64) -> PushStatus {
        if reply.echoed_correlation_id() != correlation_id {
            PushStatus::Escalated
        } else if reply.status_code == self.successfully_delivered {
            PushStatus::Processed
        } else {
            PushStatus::Unprocessed
        }
    }

    /// Problems with the table itself
    pub(crate) fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let push = [
            ("unprocessed", self.unprocessed),
            ("processed", self.processed),
            ("escalated", self.escalated),
            ("failed", self.failed),
        ];
        for (i, (name, code)) in push.iter().enumerate() {
            if *code < 0 {
                problems.push(format!("status_codes.{name} must not be negative"));
            }
            for (other, other_code) in &push[i + 1..] {
                if code == other_code {
                    problems.push(format!(
                        "status_codes.{name} and status_codes.{other} share the code {code}"
                    ));
                }
            }
        }
        if self.successfully_delivered == self.failed_to_deliver {
            problems.push(
                "status_codes.successfully_delivered and status_codes.failed_to_deliver must differ"
                    .to_string(),
            );
        }
        problems
    }
}
