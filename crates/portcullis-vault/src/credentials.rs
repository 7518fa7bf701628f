//! Credential store
//!
//! One JSON file holds the user registry, each user's salted and peppered PIN
//! hash, the admin credential and hashed registration tokens. The pepper
//! itself lives in a separate file.
//!
//! The daemon and `portcullis-admin` both open this file, so nothing is
//! cached across calls except the pepper. Readers load the file under a
//! shared lock; every mutation loads it under an exclusive lock, applies the
//! change and writes it back atomically before releasing the lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use portcullis_core::{
    EnrollmentState, Error, Result, TemplateId, UserId, CREDENTIAL_FILE_VERSION,
};

use crate::config::{KdfParams, StoreConfig};
use crate::kdf::{self, PinHash, PinHasher};
use crate::lock::FileLock;
use crate::pepper::PepperSecret;
use crate::persist;
use crate::pin::PinPolicy;
use crate::tokens::{self, RegistrationToken, TokenRecord};

/// Minimum admin password length
pub const MIN_ADMIN_PASSWORD_LENGTH: usize = 8;

/// Explicit acknowledgement required by [`CredentialStore::rotate_pepper`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAck {
    /// Every stored PIN and outstanding token becomes unusable
    InvalidateAllPins,
}

/// One registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    /// Absent until the user registers a PIN, and again after a pepper rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) pin: Option<PinHash>,
    pub enrollment_state: EnrollmentState,
    #[serde(default)]
    pub fingerprint_template_id: Option<TemplateId>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    fn new(user_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            pin: None,
            enrollment_state: EnrollmentState::Pending,
            fingerprint_template_id: None,
            created_at,
        }
    }

    /// Whether the user can currently authenticate by PIN
    pub fn has_pin(&self) -> bool {
        self.pin.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdminRecord {
    /// Argon2id PHC string, unpeppered
    password_hash: String,
    updated_at: DateTime<Utc>,
}

/// On-disk layout of the credential file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialFile {
    pub version: u32,
    /// Fingerprint of the pepper the PIN hashes were derived with
    pub pepper_fingerprint: String,
    /// Argon2id parameters fixed when the file was created
    pub kdf: KdfParams,
    #[serde(default)]
    admin: Option<AdminRecord>,
    #[serde(default)]
    users: BTreeMap<UserId, UserRecord>,
    #[serde(default)]
    tokens: Vec<TokenRecord>,
    /// Templates of removed users still stored on the sensor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    orphaned_templates: Vec<TemplateId>,
}

impl CredentialFile {
    fn new(pepper_fingerprint: String, kdf: KdfParams) -> Self {
        Self {
            version: CREDENTIAL_FILE_VERSION,
            pepper_fingerprint,
            kdf,
            admin: None,
            users: BTreeMap::new(),
            tokens: Vec::new(),
            orphaned_templates: Vec::new(),
        }
    }

    /// Parse and sanity-check a credential file
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: CredentialFile = serde_json::from_slice(bytes)?;

        if file.version != CREDENTIAL_FILE_VERSION {
            return Err(Error::Persistence(format!(
                "Unsupported credential file version {}",
                file.version
            )));
        }

        for (key, record) in &file.users {
            if *key != record.user_id {
                return Err(Error::Persistence(format!(
                    "Credential entry {} holds record for user {}",
                    key, record.user_id
                )));
            }
            if !key.is_sensor_slot() {
                return Err(Error::Persistence(format!(
                    "Credential entry for user {} is outside the sensor's slots",
                    key
                )));
            }
        }

        file.kdf.to_argon2()?;
        Ok(file)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn check_admin(&self, password: &str) -> Result<()> {
        let accepted = match &self.admin {
            Some(admin) => kdf::verify_admin_password(password, &admin.password_hash)?,
            None => false,
        };
        if accepted {
            Ok(())
        } else {
            warn!("Rejected admin credential");
            Err(Error::NotAuthorized)
        }
    }

    fn orphan_template(&mut self, template: TemplateId) {
        let still_used = self
            .users
            .values()
            .any(|r| r.fingerprint_template_id == Some(template));
        if !still_used && !self.orphaned_templates.contains(&template) {
            self.orphaned_templates.push(template);
        }
    }
}

/// Persistent credential store shared with other processes
pub struct CredentialStore {
    path: PathBuf,
    pepper_path: PathBuf,
    lock: FileLock,
    policy: PinPolicy,
    token_ttl: Duration,
    keyed: RwLock<Keyed>,
}

/// Hasher in use and the file fingerprint it was chosen for
struct Keyed {
    fingerprint: String,
    hasher: Arc<PinHasher>,
}

impl CredentialStore {
    /// Open the store, creating the credential and pepper files on first use
    ///
    /// A missing pepper next to an existing credential file is an error:
    /// generating a new one would silently invalidate every PIN.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let lock = FileLock::beside(&config.credentials_path);
        let _guard = lock.exclusive()?;
        let existing = load_file(&config.credentials_path)?;

        let pepper = if config.pepper_path.exists() {
            PepperSecret::load(&config.pepper_path)?
        } else if existing.is_some() {
            return Err(Error::Persistence(format!(
                "Pepper file {:?} is missing but credential file {:?} exists",
                config.pepper_path, config.credentials_path
            )));
        } else {
            let pepper = PepperSecret::generate();
            pepper.save(&config.pepper_path)?;
            info!("Generated new pepper at {:?}", config.pepper_path);
            pepper
        };

        Self::assemble(config, lock, existing, pepper)
    }

    /// Open the store with an explicit pepper, ignoring the pepper file
    pub fn open_with_pepper(config: StoreConfig, pepper: PepperSecret) -> Result<Self> {
        let lock = FileLock::beside(&config.credentials_path);
        let _guard = lock.exclusive()?;
        let existing = load_file(&config.credentials_path)?;
        Self::assemble(config, lock, existing, pepper)
    }

    /// Finish opening; the caller holds the exclusive lock
    fn assemble(
        config: StoreConfig,
        lock: FileLock,
        existing: Option<CredentialFile>,
        pepper: PepperSecret,
    ) -> Result<Self> {
        let (kdf, fingerprint) = match existing {
            Some(file) => {
                if file.pepper_fingerprint != pepper.fingerprint() {
                    warn!(
                        "Pepper fingerprint mismatch (file {}, loaded {}); stored PINs will not verify",
                        file.pepper_fingerprint,
                        pepper.fingerprint()
                    );
                }
                debug!(
                    "Loaded {} users from {:?}",
                    file.user_count(),
                    config.credentials_path
                );
                (file.kdf, file.pepper_fingerprint)
            }
            None => {
                let file = CredentialFile::new(pepper.fingerprint(), config.kdf);
                persist::write_json(&config.credentials_path, &file)?;
                info!("Created credential file at {:?}", config.credentials_path);
                (file.kdf, file.pepper_fingerprint)
            }
        };

        let hasher = PinHasher::new(kdf, pepper)?;

        Ok(Self {
            path: config.credentials_path,
            pepper_path: config.pepper_path,
            lock,
            policy: config.pin_policy,
            token_ttl: config.token_ttl,
            keyed: RwLock::new(Keyed {
                fingerprint,
                hasher: Arc::new(hasher),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pin_policy(&self) -> PinPolicy {
        self.policy
    }

    // ------------------------------------------------------------------
    // PINs
    // ------------------------------------------------------------------

    /// Register a PIN for `user_id`
    ///
    /// Creates the user record if the ID is a free sensor slot.
    pub fn register_pin(&self, user_id: UserId, pin: &str) -> Result<()> {
        if !user_id.is_sensor_slot() {
            return Err(Error::UnknownUser);
        }
        self.policy.validate(pin)?;

        self.update(|file, hasher| {
            if let Some(record) = file.users.get(&user_id) {
                if record.has_pin() {
                    return Err(Error::DuplicateUser(user_id));
                }
            }

            // PINs also identify users at the keypad, so they must be unique
            let mut taken = false;
            for record in file.users.values() {
                if let Some(stored) = &record.pin {
                    taken |= hasher.verify_pin(pin, stored)?;
                }
            }
            if taken {
                return Err(Error::PinTaken);
            }

            let hash = hasher.hash_pin(pin)?;
            file.users
                .entry(user_id)
                .or_insert_with(|| UserRecord::new(user_id, Utc::now()))
                .pin = Some(hash);
            Ok(())
        })?;

        info!("Registered PIN for user {}", user_id);
        Ok(())
    }

    /// Verify a PIN for a known user
    ///
    /// Unknown users and users without a PIN cost one derivation, the same
    /// as a wrong PIN.
    pub fn verify_pin(&self, user_id: UserId, pin: &str) -> Result<bool> {
        let (file, hasher) = self.snapshot()?;
        match file.users.get(&user_id) {
            Some(UserRecord {
                pin: Some(stored), ..
            }) => hasher.verify_pin(pin, stored),
            Some(_) => {
                hasher.decoy(pin)?;
                Ok(false)
            }
            None => {
                hasher.decoy(pin)?;
                Err(Error::UnknownUser)
            }
        }
    }

    /// Find the user holding `pin`, checking every record
    pub fn identify_by_pin(&self, pin: &str) -> Result<Option<UserId>> {
        let (file, hasher) = self.snapshot()?;
        let mut found = None;
        let mut checked = 0usize;

        for record in file.users.values() {
            if let Some(stored) = &record.pin {
                checked += 1;
                if hasher.verify_pin(pin, stored)? && found.is_none() {
                    found = Some(record.user_id);
                }
            }
        }

        if checked == 0 {
            hasher.decoy(pin)?;
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Admin credential
    // ------------------------------------------------------------------

    /// Set the admin password on a store that has none
    pub fn initialize_admin(&self, password: &str) -> Result<()> {
        check_admin_password(password)?;

        self.update(|file, _| {
            if file.admin.is_some() {
                return Err(Error::NotAuthorized);
            }
            file.admin = Some(AdminRecord {
                password_hash: kdf::hash_admin_password(file.kdf, password)?,
                updated_at: Utc::now(),
            });
            Ok(())
        })?;

        info!("Admin credential initialized");
        Ok(())
    }

    /// Replace the admin password
    pub fn set_admin_password(&self, current: &str, new: &str) -> Result<()> {
        check_admin_password(new)?;

        self.update(|file, _| {
            file.check_admin(current)?;
            file.admin = Some(AdminRecord {
                password_hash: kdf::hash_admin_password(file.kdf, new)?,
                updated_at: Utc::now(),
            });
            Ok(())
        })?;

        info!("Admin password changed");
        Ok(())
    }

    /// Check the admin password; false if no admin is configured
    pub fn verify_admin(&self, password: &str) -> Result<bool> {
        match self.read()?.admin {
            Some(admin) => kdf::verify_admin_password(password, &admin.password_hash),
            None => Ok(false),
        }
    }

    pub fn admin_configured(&self) -> Result<bool> {
        Ok(self.read()?.admin.is_some())
    }

    // ------------------------------------------------------------------
    // Registration tokens
    // ------------------------------------------------------------------

    /// Issue a single-use registration token for the lowest free user slot
    pub fn issue_registration_token(&self, admin_password: &str) -> Result<RegistrationToken> {
        let ttl = ChronoDuration::from_std(self.token_ttl)
            .map_err(|_| Error::Persistence("Token lifetime out of range".into()))?;

        let token = self.update(|file, hasher| {
            file.check_admin(admin_password)?;

            let now = Utc::now();
            file.tokens.retain(|t| !t.is_stale(now));

            let target = UserId::all_slots()
                .find(|id| {
                    !file.users.contains_key(id)
                        && !file
                            .tokens
                            .iter()
                            .any(|t| t.is_live(now) && t.target_user_id == *id)
                })
                .ok_or(Error::NoFreeSlot)?;

            let (code, token_hash) = loop {
                let code = tokens::generate_code();
                let hash = hasher.hash_token(&code)?;
                if !file.tokens.iter().any(|t| t.token_hash == hash) {
                    break (code, hash);
                }
            };

            let expires_at = now + ttl;
            file.tokens.push(TokenRecord {
                token_hash,
                issued_at: now,
                expires_at,
                target_user_id: target,
                consumed_at: None,
            });
            Ok(RegistrationToken::new(code, now, expires_at, target))
        })?;

        info!(
            "Issued registration token for user {} (expires {})",
            token.target_user_id(),
            token.expires_at()
        );
        Ok(token)
    }

    /// Redeem a registration code, creating a Pending user record
    pub fn redeem_registration_token(&self, code: &str) -> Result<UserId> {
        let user_id = self.update(|file, hasher| {
            let now = Utc::now();
            let hash = hasher.hash_token(code)?;

            let record = file
                .tokens
                .iter_mut()
                .find(|t| bool::from(t.token_hash.as_bytes().ct_eq(hash.as_bytes())))
                .ok_or(Error::NotAuthorized)?;

            record.check_redeemable(now)?;

            let user_id = record.target_user_id;
            record.consumed_at = Some(now);

            if file.users.contains_key(&user_id) {
                return Err(Error::NoFreeSlot);
            }
            file.users.insert(user_id, UserRecord::new(user_id, now));
            Ok(user_id)
        })?;

        info!("Registration token redeemed for user {}", user_id);
        Ok(user_id)
    }

    // ------------------------------------------------------------------
    // Pepper rotation
    // ------------------------------------------------------------------

    /// Replace the pepper, dropping every PIN hash and outstanding token
    ///
    /// Returns how many PINs were invalidated.
    pub fn rotate_pepper(&self, ack: RotationAck) -> Result<usize> {
        let RotationAck::InvalidateAllPins = ack;

        let _guard = self.lock.exclusive()?;
        let mut file = self.load()?;
        let pepper = PepperSecret::generate();
        let hasher = PinHasher::new(file.kdf, pepper.clone())?;

        let mut invalidated = 0;
        for record in file.users.values_mut() {
            if record.pin.take().is_some() {
                invalidated += 1;
            }
        }
        file.tokens.clear();
        file.pepper_fingerprint = pepper.fingerprint();

        // Credential file first: once it is written no hash depends on
        // either pepper
        self.persist(&file)?;
        pepper.save(&self.pepper_path).map_err(|e| {
            error!("Failed to write rotated pepper: {}", e);
            e
        })?;
        *self.keyed.write().map_err(|_| poisoned())? = Keyed {
            fingerprint: file.pepper_fingerprint.clone(),
            hasher: Arc::new(hasher),
        };

        warn!(
            "Pepper rotated to {}; {} PINs invalidated",
            file.pepper_fingerprint, invalidated
        );
        Ok(invalidated)
    }

    pub fn pepper_fingerprint(&self) -> Result<String> {
        Ok(self.snapshot()?.1.pepper().fingerprint())
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn user(&self, user_id: UserId) -> Result<UserRecord> {
        self.read()?
            .users
            .remove(&user_id)
            .ok_or(Error::UnknownUser)
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.read()?.users.into_values().collect())
    }

    pub fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.read()?.users.into_keys().collect())
    }

    /// Map a sensor template back to its user
    pub fn user_for_template(&self, template: TemplateId) -> Result<Option<UserId>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|r| r.fingerprint_template_id == Some(template))
            .map(|r| r.user_id))
    }

    /// Record the template the sensor assigned to a user
    pub fn assign_template(&self, user_id: UserId, template: TemplateId) -> Result<()> {
        self.update(|file, _| {
            file.users
                .get_mut(&user_id)
                .ok_or(Error::UnknownUser)?
                .fingerprint_template_id = Some(template);
            // The sensor reused the slot, so the old template is already gone
            file.orphaned_templates.retain(|t| *t != template);
            Ok(())
        })?;

        debug!("Assigned template {} to user {}", template, user_id);
        Ok(())
    }

    /// Mirror a user's enrollment state; Complete never regresses
    pub fn set_enrollment_state(&self, user_id: UserId, state: EnrollmentState) -> Result<()> {
        let changed = self.update(|file, _| {
            let record = file.users.get_mut(&user_id).ok_or(Error::UnknownUser)?;
            let current = record.enrollment_state;
            if current == state || current.is_complete() {
                return Ok(None);
            }
            record.enrollment_state = state;
            Ok(Some(current))
        })?;

        if let Some(previous) = changed {
            debug!("User {} enrollment {} -> {}", user_id, previous, state);
        }
        Ok(())
    }

    /// Remove a user (admin); their template is queued for deletion
    pub fn remove_user(&self, admin_password: &str, user_id: UserId) -> Result<UserRecord> {
        let removed = self.update(|file, _| {
            file.check_admin(admin_password)?;
            let removed = file.users.remove(&user_id).ok_or(Error::UnknownUser)?;
            if let Some(template) = removed.fingerprint_template_id {
                file.orphan_template(template);
            }
            Ok(removed)
        })?;

        info!("Removed user {}", user_id);
        Ok(removed)
    }

    /// Remove every user and outstanding token (admin)
    pub fn clear_all_users(&self, admin_password: &str) -> Result<Vec<UserRecord>> {
        let removed = self.update(|file, _| {
            file.check_admin(admin_password)?;
            let removed: Vec<UserRecord> =
                std::mem::take(&mut file.users).into_values().collect();
            for template in removed.iter().filter_map(|r| r.fingerprint_template_id) {
                file.orphan_template(template);
            }
            file.tokens.clear();
            Ok(removed)
        })?;

        warn!("Cleared {} users", removed.len());
        Ok(removed)
    }

    /// Templates of removed users that the sensor still holds
    pub fn orphaned_templates(&self) -> Result<Vec<TemplateId>> {
        Ok(self.read()?.orphaned_templates)
    }

    /// Forget an orphaned template once the sensor has deleted it
    pub fn template_deleted(&self, template: TemplateId) -> Result<()> {
        self.update(|file, _| {
            file.orphaned_templates.retain(|t| *t != template);
            Ok(())
        })
    }

    // ------------------------------------------------------------------

    /// Current file contents
    fn read(&self) -> Result<CredentialFile> {
        let _guard = self.lock.shared()?;
        self.load()
    }

    /// Current file contents and the hasher for its pepper
    fn snapshot(&self) -> Result<(CredentialFile, Arc<PinHasher>)> {
        let _guard = self.lock.shared()?;
        let file = self.load()?;
        let hasher = self.hasher_for(&file)?;
        Ok((file, hasher))
    }

    /// Read, modify and write the file under the exclusive lock
    ///
    /// Nothing is written if `apply` fails.
    fn update<T>(
        &self,
        apply: impl FnOnce(&mut CredentialFile, &PinHasher) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.exclusive()?;
        let mut file = self.load()?;
        let hasher = self.hasher_for(&file)?;
        let out = apply(&mut file, &hasher)?;
        self.persist(&file)?;
        Ok(out)
    }

    fn load(&self) -> Result<CredentialFile> {
        load_file(&self.path)?.ok_or_else(|| {
            Error::Persistence(format!("Credential file {:?} is missing", self.path))
        })
    }

    fn persist(&self, file: &CredentialFile) -> Result<()> {
        persist::write_json(&self.path, file).map_err(|e| {
            error!("Failed to persist credential file {:?}: {}", self.path, e);
            e
        })
    }

    /// Hasher for the file's pepper, picking up a rotation done elsewhere
    ///
    /// An explicitly supplied pepper stays in use until the file's
    /// fingerprint changes.
    fn hasher_for(&self, file: &CredentialFile) -> Result<Arc<PinHasher>> {
        let current = {
            let keyed = self.keyed.read().map_err(|_| poisoned())?;
            if keyed.fingerprint == file.pepper_fingerprint {
                return Ok(Arc::clone(&keyed.hasher));
            }
            Arc::clone(&keyed.hasher)
        };

        match PepperSecret::load(&self.pepper_path) {
            Ok(pepper) if pepper.fingerprint() == file.pepper_fingerprint => {
                let hasher = Arc::new(PinHasher::new(file.kdf, pepper)?);
                *self.keyed.write().map_err(|_| poisoned())? = Keyed {
                    fingerprint: file.pepper_fingerprint.clone(),
                    hasher: Arc::clone(&hasher),
                };
                info!("Loaded rotated pepper {}", file.pepper_fingerprint);
                Ok(hasher)
            }
            _ => {
                debug!("Pepper file does not match the credential file; keeping loaded pepper");
                Ok(current)
            }
        }
    }
}

fn load_file(path: &Path) -> Result<Option<CredentialFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    CredentialFile::from_json(&bytes).map(Some)
}

fn check_admin_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_ADMIN_PASSWORD_LENGTH {
        return Err(Error::WeakPassword("must be at least 8 characters"));
    }
    Ok(())
}

fn poisoned() -> Error {
    Error::Persistence("Credential store lock poisoned".into())
}
