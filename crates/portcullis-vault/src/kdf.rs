//! Key derivation for PINs, registration codes and the admin password
//!
//! - User PINs: Argon2id over `pin || pepper` with a per-record random salt.
//!   The raw 32-byte output is stored next to its salt and compared in
//!   constant time.
//! - Registration codes: HMAC-SHA-256 keyed by the pepper. Codes are
//!   short-lived and single-use, so a fast MAC is enough.
//! - Admin password: Argon2id PHC string without the pepper, so it survives
//!   a pepper rotation.

use std::fmt;

use argon2::{
    password_hash::{
        rand_core::OsRng as PhcRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Version,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use portcullis_core::{Error, Result};

use crate::config::KdfParams;
use crate::pepper::PepperSecret;
use crate::persist::hex_array;

/// Per-record salt length in bytes
pub const SALT_LEN: usize = 16;

/// Salt used for the decoy derivation when a user has no record
const DECOY_SALT: [u8; SALT_LEN] = [0x5a; SALT_LEN];

const TOKEN_DOMAIN: &[u8] = b"portcullis-registration-code-v1";

/// Stored PIN material: salt and derived hash
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHash {
    #[serde(with = "hex_array")]
    salt: [u8; SALT_LEN],
    #[serde(with = "hex_array")]
    hash: [u8; KdfParams::OUTPUT_LEN],
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(<redacted>)")
    }
}

/// Peppered Argon2id hasher for user PINs
pub(crate) struct PinHasher {
    argon2: Argon2<'static>,
    pepper: PepperSecret,
}

impl PinHasher {
    pub fn new(params: KdfParams, pepper: PepperSecret) -> Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
        Ok(Self { argon2, pepper })
    }

    pub fn pepper(&self) -> &PepperSecret {
        &self.pepper
    }

    /// Hash a PIN with a fresh random salt
    pub fn hash_pin(&self, pin: &str) -> Result<PinHash> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let derived = self.derive(pin, &salt)?;
        Ok(PinHash {
            salt,
            hash: *derived,
        })
    }

    /// Recompute and compare in constant time
    pub fn verify_pin(&self, pin: &str, stored: &PinHash) -> Result<bool> {
        let derived = self.derive(pin, &stored.salt)?;
        Ok(derived[..].ct_eq(&stored.hash[..]).into())
    }

    /// Spend one derivation's worth of time without comparing anything
    pub fn decoy(&self, pin: &str) -> Result<()> {
        self.derive(pin, &DECOY_SALT).map(|_| ())
    }

    /// HMAC a registration code for storage
    pub fn hash_token(&self, code: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.pepper.expose())
            .map_err(|e| Error::Crypto(format!("HMAC key rejected: {}", e)))?;
        mac.update(TOKEN_DOMAIN);
        mac.update(code.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn derive(&self, pin: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KdfParams::OUTPUT_LEN]>> {
        let pepper = self.pepper.expose();
        let mut material = Zeroizing::new(Vec::with_capacity(pin.len() + pepper.len()));
        material.extend_from_slice(pin.as_bytes());
        material.extend_from_slice(pepper);

        let mut out = Zeroizing::new([0u8; KdfParams::OUTPUT_LEN]);
        self.argon2
            .hash_password_into(&material, salt, &mut out[..])
            .map_err(|e| Error::Crypto(format!("PIN derivation failed: {}", e)))?;
        Ok(out)
    }
}

/// Hash the admin password into a PHC string
pub(crate) fn hash_admin_password(params: KdfParams, password: &str) -> Result<String> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let salt = SaltString::generate(&mut PhcRng);
    let password = Zeroizing::new(password.as_bytes().to_vec());

    argon2
        .hash_password(&password, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Crypto(format!("Failed to hash admin password: {}", e)))
}

/// Verify the admin password against its PHC string
pub(crate) fn verify_admin_password(password: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| Error::Persistence(format!("Invalid stored admin hash: {}", e)))?;
    let password = Zeroizing::new(password.as_bytes().to_vec());
    Ok(Argon2::default().verify_password(&password, &parsed).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher(pepper: [u8; 32]) -> PinHasher {
        PinHasher::new(KdfParams::insecure_fast(), PepperSecret::from_bytes(pepper)).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher([1; 32]);
        let stored = hasher.hash_pin("4821").unwrap();
        assert!(hasher.verify_pin("4821", &stored).unwrap());
        assert!(!hasher.verify_pin("4822", &stored).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = hasher([1; 32]);
        let a = hasher.hash_pin("4821").unwrap();
        let b = hasher.hash_pin("4821").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_pepper_changes_derivation() {
        let stored = hasher([1; 32]).hash_pin("4821").unwrap();
        assert!(!hasher([2; 32]).verify_pin("4821", &stored).unwrap());
    }

    #[test]
    fn test_token_hash_is_keyed() {
        let a = hasher([1; 32]).hash_token("123456").unwrap();
        let b = hasher([2; 32]).hash_token("123456").unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_admin_password_roundtrip() {
        let phc = hash_admin_password(KdfParams::insecure_fast(), "correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_admin_password("correct horse", &phc).unwrap());
        assert!(!verify_admin_password("battery staple", &phc).unwrap());
    }
}
