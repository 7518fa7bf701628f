//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use portcullis_vault::{
    EnrollmentPolicy, EnrollmentTracker, KdfParams, LockoutPolicy, PinPolicy, StoreConfig,
    VaultPaths,
};

use crate::error::{DaemonError, Result};

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "PORTCULLIS_CONFIG";

/// Identification controller timing and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Minimum sensor confidence for a fingerprint-only grant
    pub match_confidence_threshold: u16,

    /// Timeout for one fingerprint read (milliseconds)
    pub sensor_timeout_ms: u64,

    /// Extra reads after a sensor fault before falling back to PIN
    pub max_sensor_retries: u32,

    /// Inactivity timeout while typing a PIN or code (milliseconds)
    pub pin_entry_timeout_ms: u64,

    /// Wrong PINs allowed per session
    pub max_pin_attempts: u32,

    /// Submit automatically at this many digits instead of waiting for `#`
    pub pin_submit_length: Option<usize>,

    /// Shortest PIN accepted at the keypad
    pub min_pin_digits: usize,

    /// Digits buffered before further presses are ignored
    pub max_pin_digits: usize,

    /// Pause after a session ends during which input is ignored (milliseconds)
    pub cooldown_ms: u64,

    /// Timeout for capturing a new fingerprint (milliseconds)
    pub enrollment_timeout_ms: u64,

    /// How often removed users' templates are deleted from the sensor (milliseconds)
    #[serde(default = "default_template_sweep_ms")]
    pub template_sweep_ms: u64,
}

fn default_template_sweep_ms() -> u64 {
    30_000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            match_confidence_threshold: 50,
            sensor_timeout_ms: 5_000,
            max_sensor_retries: 2,
            pin_entry_timeout_ms: 15_000,
            max_pin_attempts: 3,
            pin_submit_length: None,
            min_pin_digits: 4,
            max_pin_digits: 8,
            cooldown_ms: 3_000,
            enrollment_timeout_ms: 30_000,
            template_sweep_ms: default_template_sweep_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn pin_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.pin_entry_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn enrollment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrollment_timeout_ms)
    }

    pub fn template_sweep(&self) -> Duration {
        Duration::from_millis(self.template_sweep_ms)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_pin_attempts == 0 {
            return Err(DaemonError::Config("max_pin_attempts must be at least 1".into()));
        }
        if self.min_pin_digits == 0 || self.min_pin_digits > self.max_pin_digits {
            return Err(DaemonError::Config(
                "min_pin_digits must be within 1..=max_pin_digits".into(),
            ));
        }
        if self.template_sweep_ms == 0 {
            return Err(DaemonError::Config("template_sweep_ms must be at least 1".into()));
        }
        if let Some(length) = self.pin_submit_length {
            if length < self.min_pin_digits || length > self.max_pin_digits {
                return Err(DaemonError::Config(
                    "pin_submit_length must lie between min_pin_digits and max_pin_digits".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Credential, enrollment and pepper files
    pub vault: VaultPaths,

    /// Argon2id parameters for a newly created credential file
    pub kdf: KdfParams,

    /// PIN guessing lockout
    pub lockout: LockoutPolicy,

    /// Progressive enrollment thresholds; when set, replaces the tracker's
    /// stored policy at startup
    #[serde(default)]
    pub enrollment: Option<EnrollmentPolicy>,

    /// Controller timing and thresholds
    pub controller: ControllerConfig,

    /// Registration token lifetime (seconds)
    pub token_ttl_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            vault: VaultPaths::default(),
            kdf: KdfParams::default(),
            lockout: LockoutPolicy::default(),
            enrollment: None,
            controller: ControllerConfig::default(),
            token_ttl_secs: portcullis_vault::DEFAULT_TOKEN_TTL.as_secs(),
        }
    }
}

impl DaemonConfig {
    /// Config file location: `PORTCULLIS_CONFIG`, else the platform config dir
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("portcullis")
                    .join("daemon.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.controller.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`, writing the defaults there first if absent
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        let config = Self::default();
        config.save(path)?;
        Ok((config, true))
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        for path in [&self.vault.credentials, &self.vault.enrollment, &self.vault.pepper] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Settings for opening the credential store
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            credentials_path: self.vault.credentials.clone(),
            pepper_path: self.vault.pepper.clone(),
            kdf: self.kdf,
            pin_policy: PinPolicy {
                min_length: self.controller.min_pin_digits,
                max_length: self.controller.max_pin_digits,
                ..PinPolicy::default()
            },
            token_ttl: Duration::from_secs(self.token_ttl_secs),
        }
    }

    /// Open the enrollment tracker, applying the configured policy
    ///
    /// Without a configured policy the tracker keeps whatever
    /// `portcullis-admin set-policy` stored last.
    pub fn open_tracker(&self) -> Result<EnrollmentTracker> {
        let tracker = EnrollmentTracker::open(
            self.vault.enrollment.clone(),
            self.enrollment.unwrap_or_default(),
        )?;

        if let Some(policy) = self.enrollment {
            if tracker.policy()? != policy {
                warn!("Enrollment policy in daemon config replaces the stored policy");
                tracker.set_policy(policy)?;
            }
        }
        Ok(tracker)
    }
}
