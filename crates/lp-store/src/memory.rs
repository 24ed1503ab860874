//! In-memory store, used by tests and embedders that do not run Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use lp_common::{DeliveryAttempt, Result, Subscription};

use crate::{DeliveryLedger, SubscriptionStore};

/// Implements both [`SubscriptionStore`] and [`DeliveryLedger`] over plain
/// vectors behind async mutexes.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: Mutex<Vec<Subscription>>,
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions.lock().await.push(subscription);
    }

    pub async fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Every recorded attempt, in insertion order.
    pub async fn all_attempts(&self) -> Vec<DeliveryAttempt> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_active_by_event(
        &self,
        event_type: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().await;
        Ok(subs
            .iter()
            .filter(|s| s.is_active && s.wants_event(event_type))
            .filter(|s| tenant_id.is_none() || s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryLedger for MemoryStore {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.attempts.lock().await.push(attempt.clone());
        Ok(())
    }

    async fn touch_last_triggered(&self, subscription_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        if let Some(sub) = subs.iter_mut().find(|s| s.id == subscription_id) {
            sub.last_triggered_at = Some(at);
        }
        Ok(())
    }

    async fn recent_attempts(
        &self,
        subscription_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DeliveryAttempt>> {
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .iter()
            .rev()
            .filter(|a| a.subscription_id == subscription_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
