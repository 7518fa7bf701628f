//! Error kinds shared by the credential store and enrollment tracker
//!
//! Expected outcomes of normal operation (a wrong PIN, an unknown finger)
//! are ordinary values, not errors. These variants cover caller mistakes,
//! authorization failures and faults the operator must see.

use thiserror::Error;

use crate::types::UserId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown user")]
    UnknownUser,

    #[error("User {0} already has a PIN")]
    DuplicateUser(UserId),

    #[error("PIN rejected by policy: {0}")]
    WeakPin(&'static str),

    #[error("Admin password rejected: {0}")]
    WeakPassword(&'static str),

    #[error("PIN already in use by another user")]
    PinTaken,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Registration token expired")]
    TokenExpired,

    #[error("Registration token already used")]
    TokenConsumed,

    #[error("No free user slot")]
    NoFreeSlot,

    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Enrollment session for user {0} exceeded its attempt budget")]
    EnrollmentTimedOut(UserId),

    #[error("No enrollment session open for user {0}")]
    NotEnrolling(UserId),

    #[error("User {0} is already enrolled")]
    AlreadyEnrolled(UserId),

    #[error("Locked out for {remaining_secs} seconds")]
    LockedOut { remaining_secs: u64 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// Whether the operator must be told about this error
    ///
    /// Everything else is an expected outcome the caller handles inline.
    pub fn is_fault(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Crypto(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(format!("Malformed data: {}", e))
    }
}
