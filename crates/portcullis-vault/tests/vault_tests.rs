//! Integration tests for the credential store and enrollment tracker

use std::time::{Duration, Instant};

use portcullis_core::{EnrollmentState, Error, UserId};
use portcullis_vault::{
    CredentialStore, EnrollmentPolicy, EnrollmentTracker, KdfParams, LockoutPolicy, PepperSecret,
    PinThrottle, RotationAck, StoreConfig, VaultPaths,
};
use tempfile::{tempdir, TempDir};

const ADMIN: &str = "drawbridge-admin";

fn store_config(dir: &TempDir) -> StoreConfig {
    let paths = VaultPaths::in_dir(dir.path(), dir.path().join("secrets").join("pepper.key"));
    StoreConfig::from_paths(&paths).with_kdf(KdfParams::insecure_fast())
}

fn open_store(dir: &TempDir) -> CredentialStore {
    CredentialStore::open(store_config(dir)).unwrap()
}

#[test]
fn test_register_and_verify_scenario() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    store.register_pin(UserId(7), "4821").unwrap();

    assert!(store.verify_pin(UserId(7), "4821").unwrap());
    assert!(!store.verify_pin(UserId(7), "0000").unwrap());
    assert!(matches!(
        store.verify_pin(UserId(8), "4821"),
        Err(Error::UnknownUser)
    ));
}

#[test]
fn test_weak_and_duplicate_pins() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    assert!(matches!(store.register_pin(UserId(7), "12"), Err(Error::WeakPin(_))));
    assert!(matches!(store.register_pin(UserId(7), "1111"), Err(Error::WeakPin(_))));

    store.register_pin(UserId(7), "4821").unwrap();
    assert!(matches!(
        store.register_pin(UserId(7), "5930"),
        Err(Error::DuplicateUser(UserId(7)))
    ));
}

#[test]
fn test_other_pepper_fails_every_pin() {
    let dir = tempdir().unwrap();
    let config = store_config(&dir);
    {
        let store = CredentialStore::open(config.clone()).unwrap();
        store.register_pin(UserId(1), "4821").unwrap();
        store.register_pin(UserId(2), "7315").unwrap();
    }

    let store = CredentialStore::open_with_pepper(config, PepperSecret::generate()).unwrap();
    assert!(!store.verify_pin(UserId(1), "4821").unwrap());
    assert!(!store.verify_pin(UserId(2), "7315").unwrap());
    assert_eq!(store.identify_by_pin("4821").unwrap(), None);
}

#[test]
fn test_rotate_pepper_invalidates_everything() {
    let dir = tempdir().unwrap();
    let config = store_config(&dir);
    let store = CredentialStore::open(config.clone()).unwrap();
    store.initialize_admin(ADMIN).unwrap();
    store.register_pin(UserId(1), "4821").unwrap();
    store.register_pin(UserId(2), "7315").unwrap();
    let token = store.issue_registration_token(ADMIN).unwrap();
    let before = store.pepper_fingerprint().unwrap();

    let invalidated = store.rotate_pepper(RotationAck::InvalidateAllPins).unwrap();
    assert_eq!(invalidated, 2);
    assert_ne!(store.pepper_fingerprint().unwrap(), before);

    assert!(!store.verify_pin(UserId(1), "4821").unwrap());
    assert!(!store.user(UserId(1)).unwrap().has_pin());
    assert!(matches!(
        store.redeem_registration_token(token.code()),
        Err(Error::NotAuthorized)
    ));

    // Users keep their identity and can re-register
    store.register_pin(UserId(1), "4821").unwrap();
    assert!(store.verify_pin(UserId(1), "4821").unwrap());

    // Admin password survives the rotation
    assert!(store.verify_admin(ADMIN).unwrap());

    // Reopening picks up the new pepper file
    drop(store);
    let reopened = CredentialStore::open(config).unwrap();
    assert!(reopened.verify_pin(UserId(1), "4821").unwrap());
}

#[test]
fn test_token_single_use() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    store.initialize_admin(ADMIN).unwrap();

    let token = store.issue_registration_token(ADMIN).unwrap();
    let user_id = store.redeem_registration_token(token.code()).unwrap();
    assert_eq!(user_id, UserId(1));

    assert!(matches!(
        store.redeem_registration_token(token.code()),
        Err(Error::TokenConsumed)
    ));
}

#[test]
fn test_token_requires_admin() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    // No admin configured yet
    assert!(matches!(
        store.issue_registration_token(ADMIN),
        Err(Error::NotAuthorized)
    ));

    store.initialize_admin(ADMIN).unwrap();
    assert!(matches!(
        store.issue_registration_token("guess-the-admin"),
        Err(Error::NotAuthorized)
    ));
}

#[test]
fn test_remove_and_clear_users() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    store.initialize_admin(ADMIN).unwrap();
    store.register_pin(UserId(1), "4821").unwrap();
    store.register_pin(UserId(2), "7315").unwrap();

    assert!(matches!(
        store.remove_user("wrong-password", UserId(1)),
        Err(Error::NotAuthorized)
    ));
    store.remove_user(ADMIN, UserId(1)).unwrap();
    assert!(matches!(store.user(UserId(1)), Err(Error::UnknownUser)));

    let cleared = store.clear_all_users(ADMIN).unwrap();
    assert_eq!(cleared.len(), 1);
    assert!(store.list_users().unwrap().is_empty());
}

#[test]
fn test_enrollment_scenario() {
    let dir = tempdir().unwrap();
    let policy = EnrollmentPolicy {
        samples_required: 4,
        min_quality: 0.5,
        max_session_attempts: 10,
    };
    let tracker = EnrollmentTracker::open(dir.path().join("enrollment.json"), policy).unwrap();

    let progress = tracker.start_enrollment(UserId(3)).unwrap();
    assert_eq!(progress.state, EnrollmentState::Collecting);

    let mut last = progress;
    for _ in 0..4 {
        last = tracker.submit_sample(UserId(3), 0.9).unwrap();
    }
    assert_eq!(last.state, EnrollmentState::Complete);
    assert_eq!(last.samples_collected, 4);

    assert!(matches!(
        tracker.submit_sample(UserId(3), 0.9),
        Err(Error::AlreadyEnrolled(UserId(3)))
    ));
    assert!(matches!(
        tracker.start_enrollment(UserId(3)),
        Err(Error::AlreadyEnrolled(UserId(3)))
    ));
}

#[test]
fn test_lockout_ignores_pin_correctness() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    store.register_pin(UserId(7), "4821").unwrap();

    let mut throttle = PinThrottle::new(LockoutPolicy::default());
    let now = Instant::now();

    for _ in 0..5 {
        throttle.check(now).unwrap();
        assert!(!store.verify_pin(UserId(7), "0000").unwrap());
        throttle.record_failure(now);
    }

    // Correct PIN, still refused while locked out
    let err = throttle.check(now + Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, Error::LockedOut { .. }));
}
