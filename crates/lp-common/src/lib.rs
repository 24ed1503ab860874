use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Subscription Types
// ============================================================================

/// Default maximum delivery attempts when a registration does not set one.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default per-attempt network timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A tenant's webhook registration: where to deliver, what to deliver,
/// and how hard to try.
///
/// Owned by the tenant-facing CRUD layer; this engine only reads it
/// (and bumps `last_triggered_at` after each attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    /// Destination endpoint. Validated as a well-formed URL at registration.
    pub url: String,
    /// Shared secret for HMAC-SHA256 signing. Absent = deliveries unsigned.
    pub secret: Option<String>,
    /// Event types this subscription wants, e.g. `"form.submit"`.
    pub events: Vec<String>,
    pub is_active: bool,
    /// Maximum attempts per delivery, >= 1.
    pub retry_count: u32,
    /// Per-attempt network timeout.
    pub timeout_ms: u64,
    /// Extra request headers. Never override Content-Type or the
    /// signature header.
    pub extra_headers: HashMap<String, String>,
    /// Timestamp of the most recent attempt of any outcome.
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub tenant_id: Option<Uuid>,
}

impl Subscription {
    pub fn wants_event(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == event_type)
    }
}

// ============================================================================
// Event Envelope
// ============================================================================

/// Wire-format wrapper sent to a destination.
///
/// Serialized exactly once per subscription per trigger; the same bytes are
/// reused for every retry so the receiver's signature check is retry-stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, timestamp: DateTime<Utc>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            timestamp,
            data,
        }
    }

    /// Serialize to the exact bytes that go on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ============================================================================
// Delivery Ledger Types
// ============================================================================

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Terminal: endpoint answered with status < 400.
    Success,
    /// Attempt failed. Terminal iff no attempts remain.
    Failed,
    /// Attempt failed and a retry is scheduled.
    Retrying,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            "retrying" => Some(AttemptStatus::Retrying),
            _ => None,
        }
    }
}

/// One row of the append-only delivery ledger.
///
/// For one logical delivery (one subscription x one event occurrence, keyed
/// by `delivery_id`) attempt numbers are contiguous starting at 1 and exactly
/// one row is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Groups the attempt rows of one logical delivery.
    pub delivery_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    /// The serialized envelope, exactly as sent.
    pub payload: String,
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    /// First 1000 bytes of the response body.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    /// 1-based.
    pub attempt_number: u32,
    /// Set only on success.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set only when more attempts remain.
    pub next_retry_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Dispatch Types
// ============================================================================

/// Aggregate outcome of one `trigger_event` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Delivery sequences started (= matching subscriptions).
    pub triggered: u32,
    /// Sequences that ended in a successful delivery.
    pub successful: u32,
    /// Sequences that exhausted their retries.
    pub failed: u32,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("store error: {0}")]
    Store(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl WebhookError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;
