#![no_main]

use libfuzzer_sys::fuzz_target;
use portcullis_core::{CREDENTIAL_FILE_VERSION, MAX_USER_ID};
use portcullis_vault::CredentialFile;

fuzz_target!(|data: &[u8]| {
    // Parse - should not panic
    if let Ok(file) = CredentialFile::from_json(data) {
        // Anything accepted must be a file we know how to use
        assert_eq!(file.version, CREDENTIAL_FILE_VERSION);
        assert!(file.user_count() <= MAX_USER_ID as usize);
    }
});
