//! PIN acceptance policy
//!
//! PINs are typed on a numeric keypad, so the policy can only work with
//! length and obvious patterns.

use portcullis_core::{Error, Result};

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 8;

/// Rules a PIN must satisfy before it is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// Reject `0000`, `7777`, ...
    pub reject_repeated: bool,
    /// Reject `1234`, `8765`, ...
    pub reject_sequential: bool,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_PIN_LENGTH,
            max_length: MAX_PIN_LENGTH,
            reject_repeated: true,
            reject_sequential: true,
        }
    }
}

impl PinPolicy {
    /// Validate a PIN against this policy
    pub fn validate(&self, pin: &str) -> Result<()> {
        if pin.len() < self.min_length || pin.len() > self.max_length {
            return Err(Error::WeakPin("wrong length"));
        }

        if !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::WeakPin("digits only"));
        }

        let digits: Vec<i8> = pin.bytes().map(|b| (b - b'0') as i8).collect();

        if self.reject_repeated && digits.windows(2).all(|w| w[0] == w[1]) {
            return Err(Error::WeakPin("repeated digit"));
        }

        if self.reject_sequential {
            let ascending = digits.windows(2).all(|w| w[1] - w[0] == 1);
            let descending = digits.windows(2).all(|w| w[0] - w[1] == 1);
            if ascending || descending {
                return Err(Error::WeakPin("sequential digits"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_validation() {
        let policy = PinPolicy::default();

        // Too short
        assert!(policy.validate("482").is_err());

        // Too long
        assert!(policy.validate("482148214").is_err());

        // Non-digits
        assert!(policy.validate("48a1").is_err());

        // Patterns
        assert!(policy.validate("0000").is_err());
        assert!(policy.validate("1234").is_err());
        assert!(policy.validate("9876").is_err());

        // Valid
        assert!(policy.validate("4821").is_ok());
        assert!(policy.validate("13572468").is_ok());
    }

    #[test]
    fn test_relaxed_policy() {
        let policy = PinPolicy {
            reject_repeated: false,
            reject_sequential: false,
            ..PinPolicy::default()
        };
        assert!(policy.validate("0000").is_ok());
        assert!(policy.validate("1234").is_ok());
    }
}
