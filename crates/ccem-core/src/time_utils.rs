use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch; clamps to zero before 1970.
pub fn current_unix_timestamp_ms() -> u64 {
    unix_ms(SystemTime::now())
}

pub(crate) fn unix_ms(at: SystemTime) -> u64 {
    let elapsed = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn unit_unix_ms_clamps_pre_epoch_and_counts_millis() {
        assert_eq!(unix_ms(UNIX_EPOCH - Duration::from_secs(5)), 0);
        assert_eq!(unix_ms(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert!(current_unix_timestamp_ms() > 1_600_000_000_000);
    }
}
