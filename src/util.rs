//! Small shared helpers

use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Percent-escape a field value for inclusion in a request body
///
/// Escapes everything outside `[A-Za-z0-9]`, matching what directory
/// servers expect for form field values.
pub fn url_escape(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

/// Current wall-clock time as unix seconds
///
/// Scheduling works in whole seconds; sub-second precision is not needed.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_escape_passthrough() {
        assert_eq!(url_escape("Radio128"), "Radio128");
    }

    #[test]
    fn test_url_escape_special_chars() {
        assert_eq!(url_escape("Rock & Roll"), "Rock%20%26%20Roll");
        assert_eq!(url_escape("/live"), "%2Flive");
    }

    #[test]
    fn test_url_escape_utf8() {
        assert_eq!(url_escape("café"), "caf%C3%A9");
    }

    #[test]
    fn test_now_secs_monotonic_enough() {
        let a = now_secs();
        let b = now_secs();
        assert!(b >= a);
        assert!(a > 1_500_000_000); // sanity: after 2017
    }
}
