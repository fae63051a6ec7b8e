// Time helpers for logging and result timestamping.
// Never used for anything consensus-related; the chain's own timestamps
// always come from block headers.

use std::time::{SystemTime, UNIX_EPOCH};

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Return timestamp in milliseconds
pub fn get_current_time_in_millis() -> TimestampMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Incorrect time returned from system clock")
        .as_millis() as TimestampMillis
}
