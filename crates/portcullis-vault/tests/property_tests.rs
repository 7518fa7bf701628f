//! Property-based tests for portcullis-vault using proptest
//!
//! Argon2 runs with minimal parameters and few cases; the properties are
//! about the store's logic, not the KDF's strength.

use proptest::prelude::*;

use portcullis_core::{EnrollmentState, Error, UserId};
use portcullis_vault::{
    CredentialStore, EnrollmentPolicy, EnrollmentTracker, KdfParams, PinPolicy, StoreConfig,
    VaultPaths,
};
use tempfile::tempdir;

fn arb_valid_pin() -> impl Strategy<Value = String> {
    "[0-9]{4,8}".prop_filter("PIN must pass policy", |pin| {
        PinPolicy::default().validate(pin).is_ok()
    })
}

fn arb_user_id() -> impl Strategy<Value = UserId> {
    (1u16..=127).prop_map(UserId::new)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_registered_pin_verifies(
        user in arb_user_id(),
        pin in arb_valid_pin(),
        other in arb_valid_pin(),
    ) {
        prop_assume!(pin != other);

        let dir = tempdir().unwrap();
        let paths = VaultPaths::in_dir(dir.path(), dir.path().join("pepper.key"));
        let store = CredentialStore::open(
            StoreConfig::from_paths(&paths).with_kdf(KdfParams::insecure_fast()),
        )
        .unwrap();

        store.register_pin(user, &pin).unwrap();
        prop_assert!(store.verify_pin(user, &pin).unwrap());
        prop_assert!(!store.verify_pin(user, &other).unwrap());
        prop_assert_eq!(store.identify_by_pin(&pin).unwrap(), Some(user));
    }

    #[test]
    fn prop_enrollment_monotonic(
        required in 1u32..8,
        min_quality in 0.1f32..0.9,
        scores in prop::collection::vec(0.0f32..=1.0, 1..40),
    ) {
        let dir = tempdir().unwrap();
        let policy = EnrollmentPolicy {
            samples_required: required,
            min_quality,
            max_session_attempts: 100,
        };
        let tracker = EnrollmentTracker::open(dir.path().join("enrollment.json"), policy).unwrap();
        let user = UserId(1);
        tracker.start_enrollment(user).unwrap();

        let mut collected = 0u32;
        let mut completed = false;

        for score in scores {
            match tracker.submit_sample(user, score) {
                Ok(progress) => {
                    prop_assert!(!completed);
                    prop_assert!(progress.samples_collected >= collected);
                    collected = progress.samples_collected;

                    let accepted = progress
                        .quality_scores
                        .iter()
                        .filter(|s| **s >= progress.min_quality)
                        .count() as u32;
                    prop_assert_eq!(accepted, progress.samples_collected);
                    prop_assert_eq!(
                        progress.state == EnrollmentState::Complete,
                        progress.samples_collected >= progress.samples_required
                    );
                    completed = progress.state.is_complete();
                }
                Err(Error::AlreadyEnrolled(_)) => prop_assert!(completed),
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            }
        }

        let final_state = tracker.progress(user).unwrap().unwrap().state;
        prop_assert_eq!(final_state.is_complete(), completed);
    }
}
