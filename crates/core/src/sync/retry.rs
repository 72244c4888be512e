//! Retry policy: backoff schedule, HTTP classification, idempotency keys.

use std::time::Duration;

use rand::Rng;

use super::SyncEntity;

/// Default ceiling on dispatch attempts before dead-lettering.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Network-level or server-side hiccup; retried with backoff.
    Transient,
    /// Remote rejected the mutation semantically; terminal conflict.
    Conflict,
    /// Client-side error that will never succeed; dead-letter immediately.
    Permanent,
}

/// Classify an HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        409 | 422 => RetryClass::Conflict,
        408 | 425 | 429 => RetryClass::Transient,
        500..=599 => RetryClass::Transient,
        _ => RetryClass::Permanent,
    }
}

/// Deterministic exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
///
/// `attempt_count` is the number of dispatches already made (>= 1 when a
/// retry is being scheduled).
pub fn backoff_delay(attempt_count: i32, base: Duration, max: Duration) -> Duration {
    const MAX_EXPONENT: u32 = 16;
    let exponent = (attempt_count.max(1) as u32 - 1).min(MAX_EXPONENT);
    let delay = base.saturating_mul(1u32 << exponent.min(31));
    delay.min(max)
}

/// Add up to 20% random jitter so recovering clients do not stampede.
pub fn with_jitter(delay: Duration) -> Duration {
    let bound = (delay.as_millis() as u64 / 5).max(1);
    let jitter = rand::thread_rng().gen_range(0..=bound);
    delay + Duration::from_millis(jitter)
}

/// Idempotency key for a remote call: stable per logical mutation so a
/// retried call the remote already processed is recognized as a duplicate.
pub fn idempotency_key(entity: SyncEntity, entity_id: &str, queue_id: i64) -> String {
    format!("{}:{}:{}", entity.as_str(), entity_id, queue_id)
}
