use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Custom epoch: 2025-01-01T00:00:00Z
const PARLEY_EPOCH: u64 = 1_735_689_600_000;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a Snowflake ID stamped with `now`.
/// Format: 42 bits timestamp | 10 bits worker | 12 bits sequence
pub fn generate_at(worker_id: u16, now: DateTime<Utc>) -> i64 {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(PARLEY_EPOCH);
    let timestamp = millis.saturating_sub(PARLEY_EPOCH);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFF;
    let id = (timestamp << 22) | ((worker_id as u64 & 0x3FF) << 12) | seq;
    id as i64
}

pub fn generate(worker_id: u16) -> i64 {
    generate_at(worker_id, Utc::now())
}

/// Extract the Unix timestamp (ms) from a snowflake.
pub fn timestamp_millis(id: i64) -> u64 {
    ((id as u64) >> 22) + PARLEY_EPOCH
}

/// Creation time encoded in a snowflake, truncated to milliseconds.
pub fn created_at(id: i64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(timestamp_millis(id)).ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
