//! Progressive enrollment tracker
//!
//! Video and biometric samples for a new user arrive over several sessions.
//! The tracker counts samples that clear the quality bar and marks the user
//! Complete once enough have been collected. State is persisted after every
//! change so progress survives restarts, and never cached between calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use portcullis_core::{EnrollmentState, Error, Result, UserId};

use crate::lock::FileLock;
use crate::persist;

/// Thresholds for progressive enrollment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentPolicy {
    /// Accepted samples needed for Complete
    pub samples_required: u32,
    /// Minimum quality score (0.0..=1.0) for a sample to count
    pub min_quality: f32,
    /// Samples per session, accepted or not, before the session times out
    pub max_session_attempts: u32,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            samples_required: 20,
            min_quality: 0.80,
            max_session_attempts: 60,
        }
    }
}

impl EnrollmentPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.samples_required == 0 {
            return Err(Error::Persistence("samples_required must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(Error::Persistence("min_quality must be within 0.0..=1.0".into()));
        }
        if self.max_session_attempts < self.samples_required {
            return Err(Error::Persistence(
                "max_session_attempts must be at least samples_required".into(),
            ));
        }
        Ok(())
    }
}

/// Enrollment progress for one user
///
/// Thresholds are copied from the policy when enrollment starts, so a policy
/// change only affects enrollments started afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentProgress {
    pub user_id: UserId,
    pub state: EnrollmentState,
    pub samples_collected: u32,
    pub samples_required: u32,
    pub min_quality: f32,
    /// Every submitted score, in order
    pub quality_scores: Vec<f32>,
    /// Samples submitted in the current session
    pub session_attempts: u32,
    pub max_session_attempts: u32,
    pub session_open: bool,
    pub last_update_time: DateTime<Utc>,
}

impl EnrollmentProgress {
    fn new(user_id: UserId, policy: &EnrollmentPolicy, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            state: EnrollmentState::Pending,
            samples_collected: 0,
            samples_required: policy.samples_required,
            min_quality: policy.min_quality,
            quality_scores: Vec::new(),
            session_attempts: 0,
            max_session_attempts: policy.max_session_attempts,
            session_open: false,
            last_update_time: now,
        }
    }

    /// Fraction complete, 0.0..=1.0
    pub fn fraction(&self) -> f32 {
        if self.samples_required == 0 {
            return 1.0;
        }
        (self.samples_collected as f32 / self.samples_required as f32).min(1.0)
    }

    pub fn remaining(&self) -> u32 {
        self.samples_required.saturating_sub(self.samples_collected)
    }
}

/// Aggregate view over several users
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub complete: usize,
    pub collecting: usize,
    pub pending: usize,
    /// Users with no tracker entry yet
    pub untracked: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrackerFile {
    policy: EnrollmentPolicy,
    #[serde(default)]
    users: BTreeMap<UserId, EnrollmentProgress>,
}

/// Persistent progressive enrollment tracker
///
/// Every call re-reads the file under [`FileLock`], so the daemon and
/// `portcullis-admin` can hold trackers on the same file.
pub struct EnrollmentTracker {
    path: PathBuf,
    lock: FileLock,
}

impl EnrollmentTracker {
    /// Open the tracker, creating it with `policy` if the file is absent
    pub fn open(path: impl Into<PathBuf>, policy: EnrollmentPolicy) -> Result<Self> {
        let path = path.into();
        policy.validate()?;

        let lock = FileLock::beside(&path);
        {
            let _guard = lock.exclusive()?;
            match persist::read_json::<TrackerFile>(&path)? {
                Some(file) => {
                    debug!("Loaded enrollment progress for {} users", file.users.len());
                }
                None => {
                    let file = TrackerFile {
                        policy,
                        users: BTreeMap::new(),
                    };
                    persist::write_json(&path, &file)?;
                }
            }
        }

        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a collection session, resuming earlier progress
    pub fn start_enrollment(&self, user_id: UserId) -> Result<EnrollmentProgress> {
        let progress = self.update(|file| {
            let now = Utc::now();
            let policy = file.policy;
            let progress = file
                .users
                .entry(user_id)
                .or_insert_with(|| EnrollmentProgress::new(user_id, &policy, now));

            if progress.state.is_complete() {
                return Err(Error::AlreadyEnrolled(user_id));
            }

            progress.state = EnrollmentState::Collecting;
            progress.session_open = true;
            progress.session_attempts = 0;
            progress.last_update_time = now;
            Ok(progress.clone())
        })?;

        info!(
            "Enrollment session opened for user {} ({}/{})",
            user_id, progress.samples_collected, progress.samples_required
        );
        Ok(progress)
    }

    /// Record one sample's quality score
    ///
    /// The sample that exhausts a session is persisted even though the call
    /// reports `EnrollmentTimedOut`.
    pub fn submit_sample(&self, user_id: UserId, quality_score: f32) -> Result<EnrollmentProgress> {
        let _guard = self.lock.exclusive()?;
        let mut file = self.load()?;

        let progress = file
            .users
            .get_mut(&user_id)
            .ok_or(Error::NotEnrolling(user_id))?;

        if progress.state.is_complete() {
            return Err(Error::AlreadyEnrolled(user_id));
        }
        if !progress.session_open {
            return Err(Error::NotEnrolling(user_id));
        }

        // NaN and infinities are recorded as failed samples
        let score = if quality_score.is_finite() {
            quality_score
        } else {
            warn!("Non-finite quality score for user {}", user_id);
            0.0
        };

        progress.quality_scores.push(score);
        progress.session_attempts += 1;
        progress.last_update_time = Utc::now();

        if score >= progress.min_quality {
            progress.samples_collected += 1;
        }

        if progress.samples_collected >= progress.samples_required {
            progress.state = EnrollmentState::Complete;
            progress.session_open = false;
            let done = progress.clone();
            self.persist(&file)?;
            info!("User {} enrollment complete", user_id);
            return Ok(done);
        }

        if progress.session_attempts >= progress.max_session_attempts {
            progress.session_open = false;
            self.persist(&file)?;
            warn!("Enrollment session for user {} exhausted its attempts", user_id);
            return Err(Error::EnrollmentTimedOut(user_id));
        }

        let current = progress.clone();
        self.persist(&file)?;
        Ok(current)
    }

    /// Discard in-progress state; a Complete record is left alone
    pub fn abandon_enrollment(&self, user_id: UserId) -> Result<()> {
        let abandoned = self.update(|file| {
            let in_progress = file
                .users
                .get(&user_id)
                .map(|p| !p.state.is_complete())
                .unwrap_or(false);
            if in_progress {
                file.users.remove(&user_id);
            }
            Ok(in_progress)
        })?;

        if abandoned {
            info!("Enrollment abandoned for user {}", user_id);
        }
        Ok(())
    }

    /// Whether samples for this user are still wanted
    pub fn should_collect(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .read()?
            .users
            .get(&user_id)
            .map(|p| p.state.wants_samples())
            .unwrap_or(false))
    }

    pub fn progress(&self, user_id: UserId) -> Result<Option<EnrollmentProgress>> {
        Ok(self.read()?.users.remove(&user_id))
    }

    pub fn list_progress(&self) -> Result<Vec<EnrollmentProgress>> {
        Ok(self.read()?.users.into_values().collect())
    }

    /// Summarize enrollment across a set of users
    pub fn progress_for(&self, user_ids: &[UserId]) -> Result<ProgressSummary> {
        let file = self.read()?;
        let mut summary = ProgressSummary {
            total: user_ids.len(),
            ..ProgressSummary::default()
        };

        for id in user_ids {
            match file.users.get(id).map(|p| p.state) {
                Some(EnrollmentState::Complete) => summary.complete += 1,
                Some(EnrollmentState::Collecting) => summary.collecting += 1,
                Some(EnrollmentState::Pending) => summary.pending += 1,
                None => summary.untracked += 1,
            }
        }
        Ok(summary)
    }

    pub fn policy(&self) -> Result<EnrollmentPolicy> {
        Ok(self.read()?.policy)
    }

    /// Replace the policy used for enrollments started from now on
    pub fn set_policy(&self, policy: EnrollmentPolicy) -> Result<()> {
        policy.validate()?;
        self.update(|file| {
            file.policy = policy;
            Ok(())
        })?;
        info!(
            "Enrollment policy set: {} samples, min quality {:.2}, {} attempts per session",
            policy.samples_required, policy.min_quality, policy.max_session_attempts
        );
        Ok(())
    }

    /// Forget a user entirely, Complete or not
    pub fn remove_user(&self, user_id: UserId) -> Result<bool> {
        self.update(|file| Ok(file.users.remove(&user_id).is_some()))
    }

    pub fn clear_all(&self) -> Result<usize> {
        self.update(|file| Ok(std::mem::take(&mut file.users).len()))
    }

    fn read(&self) -> Result<TrackerFile> {
        let _guard = self.lock.shared()?;
        self.load()
    }

    /// Read, modify and write back under the exclusive lock
    fn update<T>(&self, apply: impl FnOnce(&mut TrackerFile) -> Result<T>) -> Result<T> {
        let _guard = self.lock.exclusive()?;
        let mut file = self.load()?;
        let out = apply(&mut file)?;
        self.persist(&file)?;
        Ok(out)
    }

    fn load(&self) -> Result<TrackerFile> {
        persist::read_json(&self.path)?.ok_or_else(|| {
            Error::Persistence(format!("Enrollment file {:?} is missing", self.path))
        })
    }

    fn persist(&self, file: &TrackerFile) -> Result<()> {
        persist::write_json(&self.path, file).map_err(|e| {
            error!("Failed to persist enrollment state {:?}: {}", self.path, e);
            e
        })
    }
}
