//! Vault configuration
//!
//! File locations, key-derivation parameters and store settings. The pepper
//! defaults to the config directory while credential and enrollment state
//! default to the data directory, keeping the secret apart from the hashes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use argon2::Params;
use serde::{Deserialize, Serialize};

use portcullis_core::{Error, Result};

use crate::pin::PinPolicy;

/// Directory name under the platform data/config directories
const APP_DIR_NAME: &str = "portcullis";

/// Default registration token lifetime
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

/// Where the vault keeps its files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultPaths {
    /// Credential file (users, admin, hashed tokens)
    pub credentials: PathBuf,
    /// Progressive enrollment state
    pub enrollment: PathBuf,
    /// Pepper file, kept outside the credential file's directory
    pub pepper: PathBuf,
}

impl Default for VaultPaths {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        Self {
            credentials: data_dir.join("credentials.json"),
            enrollment: data_dir.join("enrollment.json"),
            pepper: config_dir.join("pepper.key"),
        }
    }
}

impl VaultPaths {
    /// Lay out all state files under one data directory, pepper separately
    pub fn in_dir(data_dir: &Path, pepper: PathBuf) -> Self {
        Self {
            credentials: data_dir.join("credentials.json"),
            enrollment: data_dir.join("enrollment.json"),
            pepper,
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost_kib: u32,
    /// Iterations
    pub t_cost: u32,
    /// Lanes
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP baseline for Argon2id; fits a Raspberry Pi class device
        Self {
            m_cost_kib: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Derived key length in bytes
    pub const OUTPUT_LEN: usize = 32;

    /// Minimal parameters for tests and benches only
    pub fn insecure_fast() -> Self {
        Self {
            m_cost_kib: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    pub(crate) fn to_argon2(self) -> Result<Params> {
        Params::new(
            self.m_cost_kib,
            self.t_cost,
            self.p_cost,
            Some(Self::OUTPUT_LEN),
        )
        .map_err(|e| Error::Crypto(format!("Invalid Argon2 parameters: {}", e)))
    }
}

/// Settings for opening a [`CredentialStore`](crate::CredentialStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Credential file path
    pub credentials_path: PathBuf,
    /// Pepper file path
    pub pepper_path: PathBuf,
    /// KDF parameters for a newly created credential file
    pub kdf: KdfParams,
    /// PIN acceptance rules
    pub pin_policy: PinPolicy,
    /// Registration token lifetime
    pub token_ttl: Duration,
}

impl StoreConfig {
    /// Build a store config from vault paths with default policies
    pub fn from_paths(paths: &VaultPaths) -> Self {
        Self {
            credentials_path: paths.credentials.clone(),
            pepper_path: paths.pepper.clone(),
            kdf: KdfParams::default(),
            pin_policy: PinPolicy::default(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(KdfParams::default().to_argon2().is_ok());
        assert!(KdfParams::insecure_fast().to_argon2().is_ok());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            m_cost_kib: 1,
            t_cost: 0,
            p_cost: 1,
        };
        assert!(matches!(params.to_argon2(), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_paths_in_dir() {
        let paths =
            VaultPaths::in_dir(Path::new("/var/lib/door"), PathBuf::from("/etc/door/pepper"));
        assert_eq!(paths.credentials, Path::new("/var/lib/door/credentials.json"));
        assert_eq!(paths.enrollment, Path::new("/var/lib/door/enrollment.json"));
    }
}
