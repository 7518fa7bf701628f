//! Portcullis Vault - Credential storage for the access controller
//!
//! This crate owns every piece of state that must survive a restart:
//! - Salted, peppered Argon2id PIN hashes and the user registry
//! - The admin credential and single-use registration tokens
//! - The process pepper, kept in its own file
//! - Progressive enrollment progress
//!
//! It also carries the PIN acceptance policy and the progressive lockout
//! used by the controller to throttle PIN guessing.

pub mod config;
pub mod credentials;
pub mod enrollment;
mod kdf;
mod lock;
pub mod lockout;
pub mod pepper;
mod persist;
pub mod pin;
pub mod tokens;

pub use config::{KdfParams, StoreConfig, VaultPaths, DEFAULT_TOKEN_TTL};
pub use credentials::{CredentialFile, CredentialStore, RotationAck, UserRecord};
pub use enrollment::{EnrollmentPolicy, EnrollmentProgress, EnrollmentTracker, ProgressSummary};
pub use kdf::PinHash;
pub use lockout::{LockoutPolicy, PinThrottle};
pub use pepper::PepperSecret;
pub use pin::PinPolicy;
pub use tokens::RegistrationToken;
