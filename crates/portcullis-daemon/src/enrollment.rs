//! Enrollment coordination between the credential store and the tracker
//!
//! The store holds each user's enrollment state for lookups; the tracker owns
//! the sample counts. This service advances the tracker and mirrors its state
//! into the store so the two never disagree for long.

use std::sync::Arc;

use tracing::info;

use portcullis_core::{EnrollmentState, Result, TemplateId, UserId};
use portcullis_vault::{CredentialStore, EnrollmentProgress, EnrollmentTracker};

/// Drives progressive enrollment for identified users
pub struct EnrollmentService {
    store: Arc<CredentialStore>,
    tracker: Arc<EnrollmentTracker>,
}

impl EnrollmentService {
    pub fn new(store: Arc<CredentialStore>, tracker: Arc<EnrollmentTracker>) -> Self {
        Self { store, tracker }
    }

    pub fn tracker(&self) -> &EnrollmentTracker {
        &self.tracker
    }

    /// Record a freshly captured fingerprint and open sample collection
    pub fn fingerprint_enrolled(
        &self,
        user_id: UserId,
        template: TemplateId,
    ) -> Result<EnrollmentProgress> {
        self.store.assign_template(user_id, template)?;
        let progress = self.tracker.start_enrollment(user_id)?;
        self.mirror(&progress)?;
        info!("User {} bound to template {}", user_id, template);
        Ok(progress)
    }

    /// Reopen collection for a user seen again
    pub fn resume(&self, user_id: UserId) -> Result<EnrollmentProgress> {
        let progress = self.tracker.start_enrollment(user_id)?;
        self.mirror(&progress)?;
        Ok(progress)
    }

    /// Add one quality-scored sample for `user_id`
    pub fn submit_sample(&self, user_id: UserId, quality_score: f32) -> Result<EnrollmentProgress> {
        let progress = self.tracker.submit_sample(user_id, quality_score)?;
        self.mirror(&progress)?;
        Ok(progress)
    }

    /// Drop an unfinished enrollment; a Complete user is left alone
    pub fn abandon(&self, user_id: UserId) -> Result<()> {
        self.tracker.abandon_enrollment(user_id)?;
        self.store
            .set_enrollment_state(user_id, EnrollmentState::Pending)
    }

    pub fn should_collect(&self, user_id: UserId) -> Result<bool> {
        self.tracker.should_collect(user_id)
    }

    fn mirror(&self, progress: &EnrollmentProgress) -> Result<()> {
        let current = self.store.user(progress.user_id)?.enrollment_state;
        if current != progress.state && current != EnrollmentState::Complete {
            self.store.set_enrollment_state(progress.user_id, progress.state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::Error;
    use portcullis_vault::{EnrollmentPolicy, KdfParams, PepperSecret, StoreConfig, VaultPaths};
    use tempfile::tempdir;

    fn service(dir: &std::path::Path) -> EnrollmentService {
        let paths = VaultPaths::in_dir(dir, dir.join("pepper.key"));
        let config = StoreConfig::from_paths(&paths).with_kdf(KdfParams::insecure_fast());
        let store = CredentialStore::open_with_pepper(config, PepperSecret::generate()).unwrap();
        let policy = EnrollmentPolicy {
            samples_required: 2,
            min_quality: 0.5,
            max_session_attempts: 4,
        };
        let tracker = EnrollmentTracker::open(&paths.enrollment, policy).unwrap();
        EnrollmentService::new(Arc::new(store), Arc::new(tracker))
    }

    #[test]
    fn test_state_mirrors_into_store() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        service.store.register_pin(UserId(5), "4821").unwrap();

        service.fingerprint_enrolled(UserId(5), TemplateId(5)).unwrap();
        assert_eq!(
            service.store.user_for_template(TemplateId(5)).unwrap(),
            Some(UserId(5))
        );

        service.submit_sample(UserId(5), 0.9).unwrap();
        assert_eq!(
            service.store.user(UserId(5)).unwrap().enrollment_state,
            EnrollmentState::Collecting
        );

        let progress = service.submit_sample(UserId(5), 0.95).unwrap();
        assert_eq!(progress.state, EnrollmentState::Complete);
        assert_eq!(
            service.store.user(UserId(5)).unwrap().enrollment_state,
            EnrollmentState::Complete
        );
        assert!(!service.should_collect(UserId(5)).unwrap());
    }

    #[test]
    fn test_abandon_resets_progress() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        service.store.register_pin(UserId(6), "7315").unwrap();

        service.fingerprint_enrolled(UserId(6), TemplateId(6)).unwrap();
        service.submit_sample(UserId(6), 0.9).unwrap();
        service.abandon(UserId(6)).unwrap();

        assert_eq!(
            service.store.user(UserId(6)).unwrap().enrollment_state,
            EnrollmentState::Pending
        );
        assert!(service.tracker().progress(UserId(6)).unwrap().is_none());
        assert_eq!(service.resume(UserId(6)).unwrap().samples_collected, 0);
    }

    #[test]
    fn test_unknown_user_rejected() {
        let dir = tempdir().unwrap();
        let service = service(dir.path());
        assert!(matches!(
            service.fingerprint_enrolled(UserId(9), TemplateId(9)),
            Err(Error::UnknownUser)
        ));
    }
}
