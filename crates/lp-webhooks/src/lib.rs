//! Outbound webhook delivery engine.
//!
//! Producers (forms, guest lists, contracts) call
//! [`WebhookDispatcher::trigger_event`]; the engine resolves matching
//! subscriptions, fans deliveries out concurrently, retries failed attempts
//! with exponential backoff, signs payloads with HMAC-SHA256, and records
//! every attempt in the delivery ledger.
//!
//! At-least-once semantics: a delivery is retried until it succeeds or its
//! subscription's attempt budget is exhausted. Retries are process-local;
//! surviving a crash mid-retry is out of scope.

mod delivery;
pub mod dispatcher;
pub mod signature;

pub use dispatcher::{ShutdownHandle, WebhookConfig, WebhookDispatcher};
pub use lp_common::{DispatchResult, Envelope, Subscription, WebhookError};
pub use signature::{sign, SIGNATURE_HEADER};
