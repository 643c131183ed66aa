//! Shared-secret check in front of registration

use tracing::warn;

/// Fails closed: with no configured secret every registration is refused
#[derive(Clone, Default)]
pub struct RegistrationGuard {
    expected: Option<String>,
}

impl std::fmt::Debug for RegistrationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationGuard")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl RegistrationGuard {
    pub fn new(expected: Option<String>) -> Self {
        Self {
            expected: expected.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn check(&self, presented: Option<&str>) -> bool {
        let Some(expected) = &self.expected else {
            warn!("Agent secret not configured, rejecting registration");
            return false;
        };

        match presented {
            Some(presented) => constant_time_eq(presented.as_bytes(), expected.as_bytes()),
            None => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_secret_accepted() {
        let guard = RegistrationGuard::new(Some("s3cret".into()));
        assert!(guard.check(Some("s3cret")));
        assert!(!guard.check(Some("s3cret ")));
        assert!(!guard.check(Some("wrong!")));
        assert!(!guard.check(None));
    }

    #[test]
    fn test_unconfigured_guard_fails_closed() {
        for guard in [RegistrationGuard::new(None), RegistrationGuard::new(Some(String::new()))] {
            assert!(!guard.is_configured());
            assert!(!guard.check(Some("")));
            assert!(!guard.check(Some("anything")));
        }
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(Some("Basic abc")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
