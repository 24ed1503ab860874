//! Postgres-backed store over the `webhooks` / `webhook_deliveries` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use lp_common::{
    AttemptStatus, DeliveryAttempt, Result, Subscription, WebhookError, DEFAULT_RETRY_COUNT,
    DEFAULT_TIMEOUT_MS,
};

use crate::{DeliveryLedger, SubscriptionStore};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS webhooks (
                id UUID PRIMARY KEY,
                url TEXT NOT NULL,
                secret_token TEXT,
                events TEXT[] NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                retry_count INTEGER,
                timeout_ms BIGINT,
                headers JSONB NOT NULL DEFAULT '{}'::jsonb,
                last_triggered_at TIMESTAMPTZ,
                user_id UUID
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_webhooks_active ON webhooks(is_active)",
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id BIGSERIAL PRIMARY KEY,
                delivery_id UUID NOT NULL,
                webhook_id UUID NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                http_status SMALLINT,
                response_body TEXT,
                error_message TEXT,
                attempt_number INTEGER NOT NULL,
                delivered_at TIMESTAMPTZ,
                next_retry_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_deliveries_webhook ON webhook_deliveries(webhook_id)",
            "CREATE INDEX IF NOT EXISTS idx_deliveries_delivery ON webhook_deliveries(delivery_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn map_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription> {
        let headers_json: serde_json::Value = row.get("headers");
        let extra_headers: HashMap<String, String> = headers_json
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let retry_count = row
            .get::<Option<i32>, _>("retry_count")
            .map(|n| n.max(1) as u32)
            .unwrap_or(DEFAULT_RETRY_COUNT);
        let timeout_ms = row
            .get::<Option<i64>, _>("timeout_ms")
            .map(|n| n.max(0) as u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Subscription {
            id: row.get("id"),
            url: row.get("url"),
            secret: row.get("secret_token"),
            events: row.get("events"),
            is_active: row.get("is_active"),
            retry_count,
            timeout_ms,
            extra_headers,
            last_triggered_at: row.get("last_triggered_at"),
            tenant_id: row.get("user_id"),
        })
    }

    fn map_attempt(row: &sqlx::postgres::PgRow) -> Result<DeliveryAttempt> {
        let status_str: String = row.get("status");
        let status = AttemptStatus::parse(&status_str)
            .ok_or_else(|| WebhookError::Store(format!("unknown attempt status: {status_str}")))?;

        Ok(DeliveryAttempt {
            delivery_id: row.get("delivery_id"),
            subscription_id: row.get("webhook_id"),
            event_type: row.get("event_type"),
            payload: row.get("payload"),
            status,
            http_status: row.get::<Option<i16>, _>("http_status").map(|s| s as u16),
            response_body: row.get("response_body"),
            error_message: row.get("error_message"),
            attempt_number: row.get::<i32, _>("attempt_number").max(0) as u32,
            delivered_at: row.get("delivered_at"),
            next_retry_at: row.get("next_retry_at"),
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn find_active_by_event(
        &self,
        event_type: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, secret_token, events, is_active, retry_count,
                   timeout_ms, headers, last_triggered_at, user_id
            FROM webhooks
            WHERE is_active = TRUE
              AND $1 = ANY(events)
              AND ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(event_type)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(event_type, matched = rows.len(), "Resolved subscriptions");

        rows.iter().map(Self::map_subscription).collect()
    }
}

#[async_trait]
impl DeliveryLedger for PostgresStore {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (delivery_id, webhook_id, event_type, payload, status, http_status,
                 response_body, error_message, attempt_number, delivered_at, next_retry_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(attempt.delivery_id)
        .bind(attempt.subscription_id)
        .bind(&attempt.event_type)
        .bind(&attempt.payload)
        .bind(attempt.status.as_str())
        .bind(attempt.http_status.map(|s| s as i16))
        .bind(&attempt.response_body)
        .bind(&attempt.error_message)
        .bind(attempt.attempt_number as i32)
        .bind(attempt.delivered_at)
        .bind(attempt.next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_triggered(&self, subscription_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE webhooks SET last_triggered_at = $1 WHERE id = $2")
            .bind(at)
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_attempts(
        &self,
        subscription_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT delivery_id, webhook_id, event_type, payload, status, http_status,
                   response_body, error_message, attempt_number, delivered_at, next_retry_at
            FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_attempt).collect()
    }
}
