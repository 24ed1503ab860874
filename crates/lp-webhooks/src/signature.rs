//! HMAC-SHA256 payload signing.
//!
//! The signature covers the exact serialized envelope bytes sent on the
//! wire, so a receiver can verify it against the raw request body. Because
//! the engine reuses the same bytes for every retry, the header value is
//! identical across attempts.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The `X-Webhook-Signature` header, present iff the subscription has a
/// shared secret. Lowercase, as the HTTP layer requires for static names.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Compute the signature header value for a payload: `sha256=<hex-digest>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
