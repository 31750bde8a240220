use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
///
/// A clock set before the epoch reads as `0`. Session ages saturate at zero, so a session
/// created later than that still counts as fresh.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

/// Trims a caller-supplied user address, rejecting blank input.
pub(crate) fn normalize_address(address: &str) -> Option<&str> {
    let trimmed = address.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  0xabc "), Some("0xabc"));
        assert_eq!(normalize_address(""), None);
        assert_eq!(normalize_address(" \t"), None);
    }

    #[test]
    fn test_unix_now_is_after_2024() {
        assert!(unix_now() > 1_704_067_200);
    }
}
