//! Persistence seam for the webhook engine.
//!
//! Two traits: [`SubscriptionStore`] is the read path over tenant
//! registrations, [`DeliveryLedger`] is the append-only attempt audit trail.
//! The Postgres implementation lives behind the `postgres` feature; the
//! in-memory implementation is always available and backs the engine tests.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lp_common::{DeliveryAttempt, Result, Subscription};

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Read path over active webhook registrations.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All active subscriptions wanting `event_type`, optionally scoped to a
    /// tenant. A store failure propagates; no partial list is ever returned.
    async fn find_active_by_event(
        &self,
        event_type: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>>;
}

/// Append-only record of delivery attempts.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Bump the subscription's `last_triggered_at`. Called after every
    /// attempt, success or failure.
    async fn touch_last_triggered(&self, subscription_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Most recent attempts for a subscription, newest first. Operator
    /// read path for debugging deliveries.
    async fn recent_attempts(
        &self,
        subscription_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DeliveryAttempt>>;
}
