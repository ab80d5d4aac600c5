//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unix seconds as carried in a 4-byte wire timestamp.
pub fn wire_timestamp(now: u64) -> u32 {
    u32::try_from(now).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_timestamp_saturates() {
        assert_eq!(wire_timestamp(1_700_000_000), 1_700_000_000);
        assert_eq!(wire_timestamp(u64::MAX), u32::MAX);
        assert!(unix_now() > 1_600_000_000);
    }
}
