//! Registration tokens
//!
//! A token is a short numeric code an administrator hands to a new user so
//! they can open an enrollment session at the keypad. The code is shown once;
//! the credential file only keeps its keyed hash.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use portcullis_core::{Error, Result, UserId};

/// Number of digits in a registration code
pub const TOKEN_DIGITS: usize = 6;

/// Consumed or expired token records are kept this long, then pruned
const TOKEN_RETENTION_HOURS: i64 = 24;

/// A freshly issued registration token
///
/// The only place the plaintext code exists.
pub struct RegistrationToken {
    token_value: Zeroizing<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    target_user_id: UserId,
}

impl RegistrationToken {
    pub(crate) fn new(
        token_value: Zeroizing<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        target_user_id: UserId,
    ) -> Self {
        Self {
            token_value,
            issued_at,
            expires_at,
            target_user_id,
        }
    }

    /// The code to type at the keypad
    pub fn code(&self) -> &str {
        &self.token_value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn target_user_id(&self) -> UserId {
        self.target_user_id
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token_value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("target_user_id", &self.target_user_id)
            .finish()
    }
}

/// Persisted form of a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TokenRecord {
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub target_user_id: UserId,
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Still reserving its target slot
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && !self.is_expired(now)
    }

    /// Check that this token may be redeemed now
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.consumed_at.is_some() {
            return Err(Error::TokenConsumed);
        }
        if self.is_expired(now) {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }

    /// Past its retention window and safe to forget
    ///
    /// A pruned code can no longer report `TokenConsumed`; it falls back to
    /// `NotAuthorized`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let retention = ChronoDuration::hours(TOKEN_RETENTION_HOURS);
        let settled = self.consumed_at.unwrap_or(self.expires_at).max(self.expires_at);
        now >= settled + retention
    }
}

/// Generate a random numeric code
pub(crate) fn generate_code() -> Zeroizing<String> {
    let mut rng = OsRng;
    let mut code = Zeroizing::new(String::with_capacity(TOKEN_DIGITS));
    for _ in 0..TOKEN_DIGITS {
        let digit: u8 = rng.gen_range(0..10);
        code.push(char::from(b'0' + digit));
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_in_secs: i64) -> (TokenRecord, DateTime<Utc>) {
        let now = Utc::now();
        let record = TokenRecord {
            token_hash: "00".into(),
            issued_at: now,
            expires_at: now + ChronoDuration::seconds(expires_in_secs),
            target_user_id: UserId(1),
            consumed_at: None,
        };
        (record, now)
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..32 {
            let code = generate_code();
            assert_eq!(code.len(), TOKEN_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_redeemable_then_consumed() {
        let (mut record, now) = record(600);
        assert!(record.check_redeemable(now).is_ok());
        assert!(record.is_live(now));

        record.consumed_at = Some(now);
        assert!(matches!(record.check_redeemable(now), Err(Error::TokenConsumed)));
        assert!(!record.is_live(now));
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let (record, now) = record(600);
        let at_expiry = now + ChronoDuration::seconds(600);
        assert!(matches!(record.check_redeemable(at_expiry), Err(Error::TokenExpired)));
    }

    #[test]
    fn test_consumed_wins_over_expired() {
        let (mut record, now) = record(1);
        record.consumed_at = Some(now);
        let later = now + ChronoDuration::seconds(10);
        assert!(matches!(record.check_redeemable(later), Err(Error::TokenConsumed)));
    }

    #[test]
    fn test_stale_after_retention() {
        let (record, now) = record(600);
        assert!(!record.is_stale(now));
        assert!(record.is_stale(now + ChronoDuration::hours(25)));
    }

    #[test]
    fn test_debug_redacts_code() {
        let now = Utc::now();
        let token = RegistrationToken::new(Zeroizing::new("482193".into()), now, now, UserId(4));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("482193"));
    }
}
