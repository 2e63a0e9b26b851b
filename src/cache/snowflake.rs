//! Snowflake ids encode their creation time in the upper 42 bits.

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds between the unix epoch and the first second of 2015.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Creation time of a snowflake in unix milliseconds.
pub fn timestamp_ms(id: &str) -> Option<i64> {
    let raw = id.parse::<u64>().ok()?;
    Some((raw >> 22) as i64 + DISCORD_EPOCH_MS)
}

pub fn created_at(id: &str) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp_ms(id)?).single()
}

/// The smallest snowflake created at the given time.
pub fn from_timestamp_ms(unix_ms: i64) -> String {
    let since_epoch = unix_ms.saturating_sub(DISCORD_EPOCH_MS).max(0) as u64;
    (since_epoch << 22).to_string()
}
