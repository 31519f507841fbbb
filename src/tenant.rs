//! Tenant identifier sanitization
//!
//! The tenant id is bound as a parameter to `set_config`, so it never lands
//! in SQL text. It is still restricted to the UUID character class first:
//! anything else means the authentication layer handed over something that
//! is not a tenant id, and the request is refused instead of repaired.

use crate::error::DatabaseError;

/// Longest accepted tenant identifier (a hyphenated UUID is 36)
pub const MAX_TENANT_ID_LENGTH: usize = 64;

/// Normalize a tenant id to lower-case hex and hyphens, or refuse it
///
/// # Examples
/// ```
/// # use cloudintel_nl2sql::tenant::sanitize_tenant_id;
/// let id = sanitize_tenant_id(" 7C9E6679-7425-40DE-944B-E07FC1F90AE7 ").unwrap();
/// assert_eq!(id, "7c9e6679-7425-40de-944b-e07fc1f90ae7");
///
/// assert!(sanitize_tenant_id("x'; RESET ALL; --").is_err());
/// ```
pub fn sanitize_tenant_id(raw: &str) -> Result<String, DatabaseError> {
    let candidate = raw.trim().to_ascii_lowercase();

    if candidate.is_empty() {
        return Err(DatabaseError::InvalidTenant(
            "tenant identifier is empty".to_string(),
        ));
    }

    if candidate.len() > MAX_TENANT_ID_LENGTH {
        return Err(DatabaseError::InvalidTenant(format!(
            "tenant identifier longer than {} characters",
            MAX_TENANT_ID_LENGTH
        )));
    }

    if let Some(bad) = candidate
        .chars()
        .find(|c| !(c.is_ascii_hexdigit() || *c == '-'))
    {
        // Do not echo the raw value; it may be attacker-controlled
        return Err(DatabaseError::InvalidTenant(format!(
            "unexpected character {:?} in tenant identifier",
            bad
        )));
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_uuid() {
        let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
        assert_eq!(sanitize_tenant_id(id).ok().as_deref(), Some(id));
    }

    #[test]
    fn test_lowercases_and_trims() {
        let result = sanitize_tenant_id("\tABCDEF01-2345\n");
        assert_eq!(result.ok().as_deref(), Some("abcdef01-2345"));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            sanitize_tenant_id("   "),
            Err(DatabaseError::InvalidTenant(_))
        ));
    }

    #[test]
    fn test_rejects_injection_shapes() {
        for raw in [
            "abc'; DROP TABLE person; --",
            "abc def",
            "abc;",
            "tenant-1",
            "ａｂｃ",
        ] {
            assert!(
                matches!(sanitize_tenant_id(raw), Err(DatabaseError::InvalidTenant(_))),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_rejects_overlong() {
        let raw = "a".repeat(MAX_TENANT_ID_LENGTH + 1);
        assert!(sanitize_tenant_id(&raw).is_err());
    }

    #[test]
    fn test_error_does_not_echo_input() {
        let result = sanitize_tenant_id("secret'value");
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(!e.to_string().contains("secret"));
        }
    }
}
