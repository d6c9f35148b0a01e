//! Origination-input validators (spec.md §4.6). Ported from
//! `original_source/app/validators.py`'s `PhoneNumberValidator`,
//! `AsteriskContextValidator`, `AsteriskExtensionValidator`, and
//! `CallerIDValidator` — same patterns, same limits.

use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_CLEAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d+]").unwrap());
static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\d{7,15}$").unwrap());
static CONTEXT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
static EXTENSION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,32}$").unwrap());
static CALLER_ID_STRIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9 _<>()-]").unwrap());

/// Strip everything but digits and `+`, then require E.164 shape
/// (`^\+\d{7,15}$`).
pub fn validate_phone_number(raw: &str) -> Result<String, String> {
    let cleaned = PHONE_CLEAN.replace_all(raw, "").to_string();
    if PHONE_PATTERN.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(format!(
            "Invalid phone number format. Expected E.164: +[country][number]. Got: {raw}"
        ))
    }
}

pub fn validate_context(value: &str) -> Result<String, String> {
    if CONTEXT_PATTERN.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!(
            "Invalid context '{value}'. Only alphanumeric, underscore, hyphen allowed, max 64 chars."
        ))
    }
}

pub fn validate_extension(value: &str) -> Result<String, String> {
    if EXTENSION_PATTERN.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!(
            "Invalid extension '{value}'. Only alphanumeric characters allowed, max 32 chars."
        ))
    }
}

/// Remove everything outside `[A-Za-z0-9 _<>()-]`, truncate to 128 chars.
pub fn sanitize_caller_id(value: &str) -> String {
    if value.is_empty() {
        return "Outbound Call".to_string();
    }
    let cleaned = CALLER_ID_STRIP.replace_all(value, "").to_string();
    cleaned.chars().take(128).collect()
}

pub fn validate_priority(value: i32) -> Result<i32, String> {
    if (1..=10).contains(&value) {
        Ok(value)
    } else {
        Err(format!("priority must be in [1,10], got {value}"))
    }
}

pub fn validate_timeout_ms(value: i32) -> Result<i32, String> {
    if value > 0 && value <= 600_000 {
        Ok(value)
    } else {
        Err(format!("timeout_ms must be in (0, 600000], got {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_e164() {
        assert_eq!(validate_phone_number("+14155552671").unwrap(), "+14155552671");
    }

    #[test]
    fn strips_separators_before_matching() {
        assert_eq!(
            validate_phone_number("+1 (415) 555-2671").unwrap(),
            "+14155552671"
        );
    }

    #[test]
    fn rejects_missing_leading_plus() {
        assert!(validate_phone_number("14155552671").is_err());
    }

    #[test]
    fn rejects_too_short_or_too_long() {
        assert!(validate_phone_number("+123456").is_err());
        assert!(validate_phone_number("+1234567890123456").is_err());
    }

    #[test]
    fn context_rejects_special_characters() {
        assert!(validate_context("sales;DROP TABLE").is_err());
        assert!(validate_context("sales-queue_1").is_ok());
    }

    #[test]
    fn extension_rejects_non_alphanumeric() {
        assert!(validate_extension("1000").is_ok());
        assert!(validate_extension("s").is_ok());
        assert!(validate_extension("ext-1").is_err());
    }

    #[test]
    fn caller_id_strips_and_truncates() {
        let sanitized = sanitize_caller_id("Acme, Inc. <+1-555>");
        assert!(!sanitized.contains(','));
        assert!(!sanitized.contains('.'));

        let long = "A".repeat(200);
        assert_eq!(sanitize_caller_id(&long).len(), 128);
    }

    #[test]
    fn caller_id_defaults_when_empty() {
        assert_eq!(sanitize_caller_id(""), "Outbound Call");
    }

    #[test]
    fn priority_and_timeout_bounds() {
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(11).is_err());
        assert!(validate_priority(5).is_ok());
        assert!(validate_timeout_ms(0).is_err());
        assert!(validate_timeout_ms(600_001).is_err());
        assert!(validate_timeout_ms(600_000).is_ok());
    }
}
