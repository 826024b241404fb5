//! Bucket and object name rules.
//!
//! Both URL segments follow the same S3-style rules:
//! - 3–63 characters
//! - lowercase letters, digits, dots, hyphens only
//! - cannot be formatted like an IPv4 address
//! - cannot start/end with dot or hyphen
//! - cannot contain consecutive dots or consecutive hyphens
//!
//! Names double as directory and file names under the storage root, so these
//! rules are also what keeps request paths from escaping it.

use thiserror::Error;

const NAME_MIN_LEN: usize = 3;
const NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name `{0}` is too short, must be at least 3 characters")]
    TooShort(String),
    #[error("name `{0}` is too long, must be at most 63 characters")]
    TooLong(String),
    #[error("name `{0}` contains invalid characters, allowed are lowercase letters, digits, dots and hyphens")]
    InvalidCharacters(String),
    #[error("name `{0}` must not be formatted like an IP address")]
    IpAddress(String),
    #[error("name `{0}` cannot start or end with a hyphen or dot")]
    BadEdge(String),
    #[error("name `{0}` contains consecutive hyphens or dots")]
    ConsecutiveSeparators(String),
}

/// Validate a bucket name or object key.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    let len = name.len();
    if len < NAME_MIN_LEN {
        return Err(NameError::TooShort(name.to_string()));
    }
    if len > NAME_MAX_LEN {
        return Err(NameError::TooLong(name.to_string()));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(NameError::InvalidCharacters(name.to_string()));
    }

    if is_ipv4_like(name) {
        return Err(NameError::IpAddress(name.to_string()));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(NameError::BadEdge(name.to_string()));
    }

    if name.contains("..") || name.contains("--") {
        return Err(NameError::ConsecutiveSeparators(name.to_string()));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_name("photos").is_ok());
        assert!(validate_name("cat.png").is_ok());
        assert!(validate_name("my.bucket-name").is_ok());
        assert!(validate_name("abc").is_ok());
        assert!(validate_name("123").is_ok());
        assert!(validate_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(validate_name("ab"), Err(NameError::TooShort(_))));
        assert!(matches!(validate_name(""), Err(NameError::TooShort(_))));
        assert!(matches!(
            validate_name(&"a".repeat(64)),
            Err(NameError::TooLong(_))
        ));
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(matches!(
            validate_name("Invalid_Name!"),
            Err(NameError::InvalidCharacters(_))
        ));
        assert!(validate_name("UPPER").is_err());
        assert!(validate_name("with space").is_err());
        assert!(validate_name("slash/key").is_err());
    }

    #[test]
    fn rejects_ip_addresses() {
        assert_eq!(
            validate_name("192.168.1.1"),
            Err(NameError::IpAddress("192.168.1.1".into()))
        );
        assert!(validate_name("10.0.0.1").is_err());
        // Out-of-range octets are not addresses.
        assert!(validate_name("999.1.1.1").is_ok());
    }

    #[test]
    fn rejects_bad_edges_and_runs() {
        assert!(matches!(validate_name("-abc"), Err(NameError::BadEdge(_))));
        assert!(matches!(validate_name("abc."), Err(NameError::BadEdge(_))));
        assert!(matches!(
            validate_name("a..b"),
            Err(NameError::ConsecutiveSeparators(_))
        ));
        assert!(matches!(
            validate_name("a--b"),
            Err(NameError::ConsecutiveSeparators(_))
        ));
        assert!(validate_name("a.-b").is_ok());
    }
}
