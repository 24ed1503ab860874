//! Per-subscription delivery attempt loop.
//!
//! One logical delivery walks `Pending -> Attempting -> {Success |
//! ScheduledRetry -> Attempting | ExhaustedFailure}`. Attempts within a
//! delivery are strictly sequential; every attempt is recorded in the
//! ledger before the next one starts.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lp_common::{AttemptStatus, DeliveryAttempt, Subscription};
use lp_store::DeliveryLedger;

use crate::signature::SIGNATURE_HEADER;

const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Response bodies are truncated to this many bytes in the ledger.
const RESPONSE_SNIPPET_BYTES: usize = 1_000;

/// Everything one delivery sequence needs, prepared up front by the
/// dispatcher so the wire bytes and signature are fixed before attempt 1.
pub(crate) struct DeliveryJob {
    pub subscription: Subscription,
    pub event_type: String,
    /// Exact envelope bytes sent on every attempt.
    pub body: Bytes,
    /// Precomputed signature header value, absent when the subscription has
    /// no secret.
    pub signature: Option<String>,
}

struct AttemptOutcome {
    ok: bool,
    http_status: Option<u16>,
    response_body: Option<String>,
    error_message: Option<String>,
}

/// Run one delivery to completion. Returns true iff an attempt succeeded.
pub(crate) async fn run_delivery(
    client: reqwest::Client,
    ledger: Arc<dyn DeliveryLedger>,
    job: DeliveryJob,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> bool {
    let delivery_id = Uuid::new_v4();
    let sub = &job.subscription;
    let max_attempts = sub.retry_count.max(1);
    let headers = build_headers(sub, job.signature.as_deref());
    let payload = String::from_utf8_lossy(&job.body).into_owned();

    for attempt in 1..=max_attempts {
        debug!(
            subscription_id = %sub.id,
            delivery_id = %delivery_id,
            event_type = %job.event_type,
            attempt,
            max_attempts,
            "Attempting webhook delivery"
        );
        counter!("webhook_attempts_total").increment(1);

        let outcome = attempt_once(&client, sub, &headers, job.body.clone()).await;
        let now = Utc::now();
        let is_last = attempt == max_attempts;

        let (status, next_retry_at) = if outcome.ok {
            (AttemptStatus::Success, None)
        } else if is_last {
            (AttemptStatus::Failed, None)
        } else {
            let delay = backoff_delay(attempt);
            (
                AttemptStatus::Retrying,
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default()),
            )
        };

        let record = DeliveryAttempt {
            delivery_id,
            subscription_id: sub.id,
            event_type: job.event_type.clone(),
            payload: payload.clone(),
            status,
            http_status: outcome.http_status,
            response_body: outcome.response_body,
            error_message: outcome.error_message,
            attempt_number: attempt,
            delivered_at: outcome.ok.then_some(now),
            next_retry_at,
        };

        // Ledger writes are best-effort: a bookkeeping failure must not
        // stop the delivery itself.
        if let Err(e) = ledger.record_attempt(&record).await {
            error!(
                subscription_id = %sub.id,
                delivery_id = %delivery_id,
                attempt,
                error = %e,
                "Failed to record delivery attempt"
            );
        }
        if let Err(e) = ledger.touch_last_triggered(sub.id, now).await {
            error!(
                subscription_id = %sub.id,
                error = %e,
                "Failed to update last_triggered_at"
            );
        }

        if outcome.ok {
            info!(
                subscription_id = %sub.id,
                delivery_id = %delivery_id,
                event_type = %job.event_type,
                http_status = record.http_status,
                attempt,
                "Webhook delivered"
            );
            counter!("webhook_deliveries_success").increment(1);
            return true;
        }

        warn!(
            subscription_id = %sub.id,
            delivery_id = %delivery_id,
            event_type = %job.event_type,
            http_status = record.http_status,
            error = record.error_message.as_deref().unwrap_or(""),
            attempt,
            retries_left = max_attempts - attempt,
            "Webhook attempt failed"
        );

        if is_last {
            counter!("webhook_deliveries_failed").increment(1);
            return false;
        }

        let delay = backoff_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {
                warn!(
                    subscription_id = %sub.id,
                    delivery_id = %delivery_id,
                    "Shutdown requested, abandoning pending retries"
                );
                // Close the delivery with a terminal row so the ledger does
                // not end on a retry that will never happen.
                let abandoned = DeliveryAttempt {
                    delivery_id,
                    subscription_id: sub.id,
                    event_type: job.event_type.clone(),
                    payload: payload.clone(),
                    status: AttemptStatus::Failed,
                    http_status: None,
                    response_body: None,
                    error_message: Some("abandoned on shutdown".to_string()),
                    attempt_number: attempt,
                    delivered_at: None,
                    next_retry_at: None,
                };
                if let Err(e) = ledger.record_attempt(&abandoned).await {
                    error!(
                        subscription_id = %sub.id,
                        delivery_id = %delivery_id,
                        error = %e,
                        "Failed to record abandoned delivery"
                    );
                }
                counter!("webhook_deliveries_failed").increment(1);
                return false;
            }
        }
    }

    false
}

/// Issue one HTTP POST, bounded by the subscription's per-attempt timeout.
///
/// Any status >= 400 is a retryable failure, deliberately without
/// distinguishing 4xx from 5xx: receivers rely on retry-on-4xx during
/// temporary misconfiguration windows.
async fn attempt_once(
    client: &reqwest::Client,
    sub: &Subscription,
    headers: &HeaderMap,
    body: Bytes,
) -> AttemptOutcome {
    let result = client
        .post(&sub.url)
        .headers(headers.clone())
        .timeout(Duration::from_millis(sub.timeout_ms))
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let snippet = read_snippet(response).await;
            AttemptOutcome {
                ok: status < 400,
                http_status: Some(status),
                response_body: Some(snippet),
                error_message: None,
            }
        }
        Err(e) => {
            let error_message = if e.is_timeout() {
                format!("request timed out after {}ms", sub.timeout_ms)
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                format!("request error: {e}")
            };
            AttemptOutcome {
                ok: false,
                http_status: None,
                response_body: None,
                error_message: Some(error_message),
            }
        }
    }
}

/// Request headers for one delivery, identical across its attempts.
///
/// Tenant-configured extras go in first so they can never override the
/// content type or the signature header.
fn build_headers(sub: &Subscription, signature: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &sub.extra_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => {
                warn!(
                    subscription_id = %sub.id,
                    header = %name,
                    "Skipping invalid extra header"
                );
            }
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(sig) = signature {
        if let Ok(value) = HeaderValue::from_str(sig) {
            headers.insert(HeaderName::from_static(SIGNATURE_HEADER), value);
        }
    }

    headers
}

/// Exponential backoff before the next attempt:
/// `min(1000ms * 2^(attempt-1), 30000ms)`.
fn backoff_delay(attempt_number: u32) -> Duration {
    let exp = attempt_number.saturating_sub(1).min(5);
    Duration::from_millis((BASE_BACKOFF_MS << exp).min(MAX_BACKOFF_MS))
}

/// Read at most a snippet's worth of the response body. Stops pulling
/// chunks once the limit is reached, so an endpoint cannot make an attempt
/// buffer an arbitrarily large response.
async fn read_snippet(mut response: reqwest::Response) -> String {
    let mut buf: Vec<u8> = Vec::with_capacity(RESPONSE_SNIPPET_BYTES);
    while let Ok(Some(chunk)) = response.chunk().await {
        buf.extend_from_slice(&chunk);
        if buf.len() >= RESPONSE_SNIPPET_BYTES {
            break;
        }
    }
    truncate_snippet(String::from_utf8_lossy(&buf).into_owned())
}

/// First `RESPONSE_SNIPPET_BYTES` of a response body, cut on a char
/// boundary.
fn truncate_snippet(mut body: String) -> String {
    if body.len() > RESPONSE_SNIPPET_BYTES {
        let mut end = RESPONSE_SNIPPET_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
