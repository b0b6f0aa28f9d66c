//! Field value validators.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[allow(clippy::expect_used)]
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?\(?[0-9]{3}\)?[-\s.]?[0-9]{3}[-\s.]?[0-9]{4,6}$").expect("valid phone regex")
});

#[must_use]
pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

#[must_use]
pub fn is_valid_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

#[must_use]
pub fn is_valid_url(value: &str) -> bool {
    reqwest::Url::parse(value).is_ok()
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates.
#[must_use]
pub fn is_valid_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(is_valid_email("ops@starks.io"));
        assert!(!is_valid_email("ops@starks"));
        assert!(!is_valid_email("two words@starks.io"));
    }

    #[test]
    fn test_phone() {
        assert!(is_valid_phone("+254 712 345678"));
        assert!(is_valid_phone("(555)123-4567"));
        assert!(!is_valid_phone("12345"));
    }

    #[test]
    fn test_date() {
        assert!(is_valid_date("2024-12-15"));
        assert!(is_valid_date("2024-12-15T09:30:00Z"));
        assert!(!is_valid_date("15/12/2024"));
    }

    #[test]
    fn test_url() {
        assert!(is_valid_url("https://starks.io/portfolio"));
        assert!(!is_valid_url("starks dot io"));
    }
}
