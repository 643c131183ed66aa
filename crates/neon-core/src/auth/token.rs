//! HS256 bearer tokens bound to one server identity

use super::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_ISSUER: &str = "neon-master";
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * DEFAULT_TOKEN_TTL_SECS;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Signed claims; serde enforces a numeric `serverId` and a string `serverName`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    server_id: i64,
    server_name: String,
    iat: i64,
    exp: i64,
    iss: String,
    sub: String,
}

/// Identity carried by a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub server_id: i64,
    pub server_name: String,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    /// Remaining lifetime in whole seconds, never negative
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> u64 {
        time_to_expiry(self.expires_at, now)
    }
}

pub fn time_to_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (expires_at - now).num_seconds().max(0) as u64
}

/// Issues and verifies agent tokens
#[derive(Clone)]
pub struct TokenService {
    mac: HmacSha256,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(
        secret: impl AsRef<[u8]>,
        issuer: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::InvalidKey("signing secret is empty".into()));
        }
        if ttl <= Duration::zero() {
            return Err(AuthError::InvalidKey("token lifetime must be positive".into()));
        }
        if ttl > Duration::seconds(MAX_TOKEN_TTL_SECS) {
            return Err(AuthError::InvalidKey(format!(
                "token lifetime exceeds {MAX_TOKEN_TTL_SECS} seconds"
            )));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;

        Ok(Self {
            mac,
            issuer: issuer.into(),
            ttl,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue(&self, server_id: i64, server_name: &str) -> Result<String, AuthError> {
        self.issue_at(server_id, server_name, Utc::now())
    }

    pub fn issue_at(
        &self,
        server_id: i64,
        server_name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(AuthError::ExpiryOutOfRange)?;
        let claims = Claims {
            server_id,
            server_name: server_name.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            sub: format!("agent:{server_id}"),
        };

        let signing_input = format!("{}.{}", encode_part(&header)?, encode_part(&claims)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));
        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature, algorithm, issuer, claim shape and expiry
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header: Header = decode_part(header_b64)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_part(claims_b64)?;
        if claims.iss != self.issuer {
            return Err(AuthError::InvalidIssuer(claims.iss));
        }

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::InvalidClaims(
                "expiry out of range".into(),
            ))?;
        if expires_at <= now {
            return Err(AuthError::Expired);
        }

        Ok(VerifiedToken {
            server_id: claims.server_id,
            server_name: claims.server_name,
            expires_at,
        })
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

fn encode_part<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(value).map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_part<T: serde::de::DeserializeOwned>(part: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidClaims(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            "test-secret",
            DEFAULT_ISSUER,
            Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        )
        .unwrap()
    }

    /// Sign arbitrary claims with the test key
    fn forge(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let input = format!("{header}.{body}");
        let sig = URL_SAFE_NO_PAD.encode(service().sign(input.as_bytes()));
        format!("{input}.{sig}")
    }

    #[test]
    fn test_issue_and_verify() {
        let svc = service();
        let token = svc.issue(7, "web-1").unwrap();
        let verified = svc.verify(&token).unwrap();

        assert_eq!(verified.server_id, 7);
        assert_eq!(verified.server_name, "web-1");
    }

    #[test]
    fn test_fresh_token_lifetime() {
        let svc = service();
        let now = Utc::now();
        let token = svc.issue_at(1, "db-1", now).unwrap();

        let remaining = svc.verify_at(&token, Utc::now()).unwrap().time_to_expiry(Utc::now());
        let day = DEFAULT_TOKEN_TTL_SECS as u64;
        assert!(remaining <= day);
        assert!(remaining >= day - 5);
    }

    #[test]
    fn test_time_to_expiry_floors_at_zero() {
        let now = Utc::now();
        assert_eq!(time_to_expiry(now - Duration::seconds(30), now), 0);
        assert_eq!(time_to_expiry(now + Duration::seconds(30), now), 30);
    }

    #[test]
    fn test_expired_token_rejected() {
        let svc = service();
        let issued = Utc::now() - Duration::hours(25);
        let token = svc.issue_at(1, "db-1", issued).unwrap();

        assert!(matches!(svc.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let other = TokenService::new("other", DEFAULT_ISSUER, Duration::hours(1)).unwrap();
        let token = other.issue(1, "db-1").unwrap();

        assert!(matches!(service().verify(&token), Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let other = TokenService::new("test-secret", "someone-else", Duration::hours(1)).unwrap();
        let token = other.issue(1, "db-1").unwrap();

        assert!(matches!(
            service().verify(&token),
            Err(AuthError::InvalidIssuer(_))
        ));
    }

    #[test]
    fn test_claim_shape_enforced() {
        let exp = (Utc::now() + Duration::hours(1)).timestamp();
        let token = forge(serde_json::json!({
            "serverId": "7",
            "serverName": "web-1",
            "iat": 0,
            "exp": exp,
            "iss": DEFAULT_ISSUER,
            "sub": "agent:7",
        }));
        assert!(matches!(
            service().verify(&token),
            Err(AuthError::InvalidClaims(_))
        ));

        let token = forge(serde_json::json!({
            "serverId": 7,
            "serverName": 12,
            "iat": 0,
            "exp": exp,
            "iss": DEFAULT_ISSUER,
            "sub": "agent:7",
        }));
        assert!(matches!(
            service().verify(&token),
            Err(AuthError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let svc = service();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.**"] {
            assert!(svc.verify(token).is_err(), "accepted {token:?}");
        }

        let token = svc.issue(1, "db-1").unwrap();
        let tampered = token.replacen('.', ".x", 1);
        assert!(svc.verify(&tampered).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(TokenService::new("", DEFAULT_ISSUER, Duration::hours(1)).is_err());
    }

    #[test]
    fn test_oversized_lifetime_rejected() {
        let ttl = Duration::seconds(MAX_TOKEN_TTL_SECS + 1);
        assert!(matches!(
            TokenService::new("test-secret", DEFAULT_ISSUER, ttl),
            Err(AuthError::InvalidKey(_))
        ));
        assert!(TokenService::new(
            "test-secret",
            DEFAULT_ISSUER,
            Duration::seconds(MAX_TOKEN_TTL_SECS)
        )
        .is_ok());
    }

    #[test]
    fn test_expiry_past_calendar_range_is_an_error() {
        let svc = service();
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        assert!(matches!(
            svc.issue_at(1, "db-1", near_end),
            Err(AuthError::ExpiryOutOfRange)
        ));
    }
}
