//! Event dispatcher: resolves subscriptions and fans deliveries out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use lp_common::{DispatchResult, Envelope, Result, WebhookError};
use lp_store::{DeliveryLedger, SubscriptionStore};

use crate::delivery::{run_delivery, DeliveryJob};
use crate::signature::sign;

/// Engine configuration, passed in explicitly so tests can run against
/// fake stores and mock endpoints without touching process state.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Service name for the `User-Agent` header (`<service>/1.0`).
    pub service_name: String,
    /// TCP connect timeout on the shared client. Per-attempt request
    /// timeouts come from each subscription.
    pub connect_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            service_name: "linkpage".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl WebhookConfig {
    fn user_agent(&self) -> String {
        format!("{}/1.0", self.service_name)
    }
}

/// Signals in-flight deliveries to abandon pending retries. Best-effort:
/// attempts already on the wire still settle and get recorded.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// The producer-facing entry point of the delivery engine.
pub struct WebhookDispatcher {
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn DeliveryLedger>,
    client: reqwest::Client,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn DeliveryLedger>,
        config: WebhookConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                WebhookError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            store,
            ledger,
            client,
            shutdown_tx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Notify every matching subscription about a domain event.
    ///
    /// One detached delivery task is spawned per matching subscription, so
    /// started deliveries run to completion even if the caller drops the
    /// returned future after the tasks are spawned. Awaiting yields the
    /// aggregate counts once all sequences settle.
    ///
    /// A store failure fails closed: nothing is dispatched rather than
    /// dispatching to an incomplete subscription set. Delivery failures
    /// never surface as errors, only as counts.
    pub async fn trigger_event(
        &self,
        event_type: &str,
        data: serde_json::Value,
        tenant_id: Option<Uuid>,
    ) -> Result<DispatchResult> {
        if event_type.is_empty() {
            return Err(WebhookError::validation("event type must not be empty"));
        }

        let subscriptions = self
            .store
            .find_active_by_event(event_type, tenant_id)
            .await?;

        if subscriptions.is_empty() {
            debug!(event_type, "No active subscriptions match event");
            return Ok(DispatchResult::default());
        }

        // One timestamp and one serialization per trigger: every recipient
        // sees the same envelope, and retries reuse the same bytes.
        let envelope = Envelope::new(event_type, Utc::now(), data);
        let body = Bytes::from(envelope.to_bytes()?);

        info!(
            event_type,
            subscriptions = subscriptions.len(),
            "Dispatching event"
        );

        let triggered = subscriptions.len() as u32;
        let mut handles = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            let signature = subscription.secret.as_deref().map(|s| sign(s, &body));
            let job = DeliveryJob {
                subscription,
                event_type: event_type.to_string(),
                body: body.clone(),
                signature,
            };
            handles.push(tokio::spawn(run_delivery(
                self.client.clone(),
                self.ledger.clone(),
                job,
                self.shutdown_tx.subscribe(),
            )));
        }

        let mut successful = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => successful += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Delivery task panicked");
                    failed += 1;
                }
            }
        }

        Ok(DispatchResult {
            triggered,
            successful,
            failed,
        })
    }
}
