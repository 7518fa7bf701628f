//! Process-wide pepper
//!
//! The pepper is mixed into every PIN derivation and token HMAC. It lives in
//! its own file, away from the credential file, so a leaked credential file
//! alone cannot be brute-forced. The credential file records only a short
//! fingerprint so a mismatched pepper can be detected at startup.

use std::fmt;
use std::fs;
use std::path::Path;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use portcullis_core::{Error, Result};

use crate::persist;

/// Pepper length in bytes
pub const PEPPER_LEN: usize = 32;

const FINGERPRINT_DOMAIN: &[u8] = b"portcullis-pepper-fingerprint-v1";

/// Secret pepper, zeroized on drop
#[derive(Clone)]
pub struct PepperSecret(Zeroizing<[u8; PEPPER_LEN]>);

impl PepperSecret {
    /// Generate a fresh random pepper
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; PEPPER_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Wrap existing pepper bytes
    pub fn from_bytes(bytes: [u8; PEPPER_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Load a hex-encoded pepper file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = Zeroizing::new(fs::read_to_string(path)?);
        let mut bytes = Zeroizing::new([0u8; PEPPER_LEN]);
        hex::decode_to_slice(contents.trim(), &mut bytes[..])
            .map_err(|e| Error::Persistence(format!("Malformed pepper file: {}", e)))?;
        Ok(Self(bytes))
    }

    /// Write the pepper to `path` (0600, atomic)
    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = Zeroizing::new(hex::encode(&self.0[..]));
        persist::write_atomic(path, encoded.as_bytes())
    }

    /// Short public fingerprint identifying this pepper
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&self.0[..]);
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for PepperSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PepperSecret({})", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pepper.key");

        let pepper = PepperSecret::generate();
        pepper.save(&path).unwrap();

        let loaded = PepperSecret::load(&path).unwrap();
        assert_eq!(pepper.expose(), loaded.expose());
        assert_eq!(pepper.fingerprint(), loaded.fingerprint());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let pepper = PepperSecret::from_bytes([0xAB; PEPPER_LEN]);
        let debug = format!("{:?}", pepper);
        assert!(!debug.contains("abababab"));
        assert!(debug.contains(&pepper.fingerprint()));
    }

    #[test]
    fn test_malformed_file_is_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pepper.key");
        fs::write(&path, "not-hex").unwrap();
        assert!(matches!(PepperSecret::load(&path), Err(Error::Persistence(_))));
    }
}
