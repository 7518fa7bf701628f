//! End-to-end workflow tests for Portcullis
//!
//! These tests walk a unit through its life: admin setup, issuing and
//! redeeming a registration code, progressive enrollment, restarts,
//! identification at the door and pepper rotation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;

use portcullis_core::{
    ControllerState, EnrollmentState, Error, Key, RecognitionOutcome, RecognitionSource,
    TemplateId, TemplateMatch, UserId,
};
use portcullis_daemon::{
    BiometricSensor, Controller, ControllerConfig, EnrollmentService, LogRecorder, SensorFault,
    SensorReading,
};
use portcullis_vault::{
    CredentialFile, CredentialStore, EnrollmentPolicy, EnrollmentTracker, KdfParams,
    LockoutPolicy, RotationAck, StoreConfig, VaultPaths,
};

const ADMIN: &str = "portcullis-e2e";

fn paths(dir: &TempDir) -> VaultPaths {
    VaultPaths::in_dir(&dir.path().join("data"), dir.path().join("etc").join("pepper.key"))
}

fn open(dir: &TempDir) -> (Arc<CredentialStore>, Arc<EnrollmentTracker>) {
    let paths = paths(dir);
    let store = CredentialStore::open(
        StoreConfig::from_paths(&paths).with_kdf(KdfParams::insecure_fast()),
    )
    .unwrap();
    let policy = EnrollmentPolicy {
        samples_required: 3,
        min_quality: 0.7,
        max_session_attempts: 5,
    };
    let tracker = EnrollmentTracker::open(&paths.enrollment, policy).unwrap();
    (Arc::new(store), Arc::new(tracker))
}

/// Sensor that always matches the same template
struct FixedSensor(TemplateMatch);

#[async_trait]
impl BiometricSensor for FixedSensor {
    async fn read_fingerprint(&self, _timeout: Duration) -> Result<SensorReading, SensorFault> {
        Ok(SensorReading::Match(self.0))
    }

    async fn enroll_fingerprint(
        &self,
        _slot: UserId,
        _timeout: Duration,
    ) -> Result<TemplateId, SensorFault> {
        Ok(self.0.id)
    }

    async fn delete_template(&self, _template: TemplateId) -> Result<(), SensorFault> {
        Ok(())
    }

    fn device_type(&self) -> &'static str {
        "fixed"
    }
}

async fn next_terminal(states: &mut broadcast::Receiver<ControllerState>) -> ControllerState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match states.recv().await {
                Ok(state) if state.is_terminal() => return state,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("controller stopped"),
            }
        }
    })
    .await
    .expect("session never finished")
}

/// Walks one user from registration code to Complete enrollment
#[test]
fn test_full_enrollment_lifecycle() {
    let dir = tempfile::tempdir().unwrap();

    // ==========================================
    // STEP 1: Initialize the unit
    // ==========================================
    let (store, tracker) = open(&dir);
    store.initialize_admin(ADMIN).unwrap();
    assert!(store.admin_configured().unwrap());
    assert!(matches!(
        store.initialize_admin("another-password"),
        Err(Error::NotAuthorized)
    ));

    // ==========================================
    // STEP 2: Issue and redeem a registration code
    // ==========================================
    let token = store.issue_registration_token(ADMIN).unwrap();
    assert_eq!(token.code().len(), 6);
    assert!(token.expires_at() > token.issued_at());

    let user_id = store.redeem_registration_token(token.code()).unwrap();
    assert_eq!(user_id, token.target_user_id());
    assert_eq!(
        store.user(user_id).unwrap().enrollment_state,
        EnrollmentState::Pending
    );

    // ==========================================
    // STEP 3: Capture fingerprint and PIN
    // ==========================================
    let service = EnrollmentService::new(Arc::clone(&store), Arc::clone(&tracker));
    service.fingerprint_enrolled(user_id, TemplateId(12)).unwrap();
    store.register_pin(user_id, "5930").unwrap();

    // ==========================================
    // STEP 4: Progressive sample collection over two sessions
    // ==========================================
    service.submit_sample(user_id, 0.9).unwrap();
    service.submit_sample(user_id, 0.2).unwrap();

    // The user comes back another day
    let progress = service.resume(user_id).unwrap();
    assert_eq!(progress.samples_collected, 1);
    assert_eq!(progress.quality_scores.len(), 2);

    service.submit_sample(user_id, 0.8).unwrap();
    let progress = service.submit_sample(user_id, 0.95).unwrap();
    assert_eq!(progress.state, EnrollmentState::Complete);
    assert_eq!(
        store.user(user_id).unwrap().enrollment_state,
        EnrollmentState::Complete
    );
    assert!(matches!(
        service.resume(user_id),
        Err(Error::AlreadyEnrolled(_))
    ));

    // Abandoning a finished enrollment changes nothing
    service.abandon(user_id).unwrap();
    assert!(!service.should_collect(user_id).unwrap());

    // ==========================================
    // STEP 5: Restart and check persisted state
    // ==========================================
    drop(service);
    drop(store);
    drop(tracker);

    let (store, tracker) = open(&dir);
    assert!(store.verify_pin(user_id, "5930").unwrap());
    assert_eq!(
        store.user_for_template(TemplateId(12)).unwrap(),
        Some(user_id)
    );
    let summary = tracker.progress_for(&store.user_ids().unwrap()).unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.complete, 1);

    let raw = std::fs::read(&paths(&dir).credentials).unwrap();
    let file = CredentialFile::from_json(&raw).unwrap();
    assert_eq!(file.user_count(), 1);
    assert_eq!(file.pepper_fingerprint, store.pepper_fingerprint().unwrap());

    // ==========================================
    // STEP 6: Rotate the pepper
    // ==========================================
    let invalidated = store.rotate_pepper(RotationAck::InvalidateAllPins).unwrap();
    assert_eq!(invalidated, 1);
    assert!(!store.verify_pin(user_id, "5930").unwrap());
    assert_eq!(
        store.user(user_id).unwrap().enrollment_state,
        EnrollmentState::Complete
    );

    // ==========================================
    // STEP 7: Remove the user
    // ==========================================
    let removed = store.remove_user(ADMIN, user_id).unwrap();
    assert_eq!(removed.user_id, user_id);
    assert!(tracker.remove_user(user_id).unwrap());
    assert!(store.list_users().unwrap().is_empty());
}

/// Identification at the door against a store that was enrolled offline
#[tokio::test]
async fn test_door_identification_after_enrollment() {
    let dir = tempfile::tempdir().unwrap();
    let (store, tracker) = open(&dir);
    store.register_pin(UserId(2), "7315").unwrap();
    store.register_pin(UserId(9), "4821").unwrap();
    store.assign_template(UserId(9), TemplateId(90)).unwrap();

    let config = ControllerConfig {
        pin_entry_timeout_ms: 2_000,
        cooldown_ms: 50,
        ..ControllerConfig::default()
    };
    let threshold = config.match_confidence_threshold;

    // A weak match for user 9 falls back to PIN with user 9 as the candidate
    let sensor = FixedSensor(TemplateMatch {
        id: TemplateId(90),
        confidence: threshold - 1,
    });
    let enrollment = Arc::new(EnrollmentService::new(Arc::clone(&store), tracker));
    let (controller, handle) = Controller::new(
        config,
        LockoutPolicy::default(),
        Arc::clone(&store),
        enrollment,
        Arc::new(sensor),
        Arc::new(LogRecorder),
    )
    .unwrap();
    let mut states = handle.subscribe();
    tokio::spawn(controller.run());

    // ==========================================
    // Someone else's PIN does not pass for the candidate
    // ==========================================
    handle.trigger().await.unwrap();
    loop {
        let state = states.recv().await.unwrap();
        if matches!(state, ControllerState::AwaitingPin { .. }) {
            break;
        }
    }
    for c in "7315#".chars() {
        handle.press(Key::from_char(c).unwrap()).await.unwrap();
    }
    loop {
        let state = states.recv().await.unwrap();
        if matches!(state, ControllerState::AwaitingPin { attempts_left: 2, .. }) {
            break;
        }
    }

    // ==========================================
    // The candidate's own PIN does
    // ==========================================
    for c in "4821#".chars() {
        handle.press(Key::from_char(c).unwrap()).await.unwrap();
    }
    let state = next_terminal(&mut states).await;
    assert_eq!(
        state,
        ControllerState::Recognized {
            user_id: UserId(9),
            source: RecognitionSource::Pin
        }
    );
    let outcome = RecognitionOutcome::PinFallbackUsed { user_id: UserId(9) };
    assert!(outcome.grants_access());
}
