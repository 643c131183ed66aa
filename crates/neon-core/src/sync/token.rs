//! Bearer token held by the agent
//!
//! The only transitions are: registration stores a token, a heartbeat
//! records its remaining lifetime, and a 401 (or a proactive refresh) clears
//! it.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldToken {
    pub value: String,
    pub server_id: i64,
    /// Known once a heartbeat has reported the remaining lifetime
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenState {
    #[default]
    NoToken,
    Token(HeldToken),
}

impl TokenState {
    pub fn issue(&mut self, value: impl Into<String>, server_id: i64) {
        *self = TokenState::Token(HeldToken {
            value: value.into(),
            server_id,
            expires_at: None,
        });
    }

    /// Record the lifetime reported by the master; ignored without a token
    pub fn record_expiry(&mut self, expires_in_secs: u64, now: DateTime<Utc>) {
        if let TokenState::Token(held) = self {
            let secs = i64::try_from(expires_in_secs).unwrap_or(i64::MAX);
            held.expires_at = Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d));
        }
    }

    pub fn clear(&mut self) {
        *self = TokenState::NoToken;
    }

    pub fn bearer(&self) -> Option<&str> {
        match self {
            TokenState::Token(held) => Some(held.value.as_str()),
            TokenState::NoToken => None,
        }
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            TokenState::Token(held) => Some(held.server_id),
            TokenState::NoToken => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, TokenState::Token(_))
    }

    /// True when the recorded expiry falls within `margin` of `now`
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match self {
            TokenState::Token(HeldToken {
                expires_at: Some(at),
                ..
            }) => *at - now < margin,
            _ => false,
        }
    }
}
