//! Portcullis Core - Shared types for two-factor access control
//!
//! This crate provides the data model that crosses component boundaries:
//! user and template identifiers, enrollment state, the immutable
//! [`RecognitionEvent`] emitted once per identification session, the
//! controller states consumed by feedback adapters, keypad keys, and the
//! error kinds shared by the credential store and the enrollment tracker.

pub mod error;
pub mod event;
pub mod key;
pub mod state;
pub mod types;

pub use error::{Error, Result};
pub use event::{RecognitionEvent, RecognitionOutcome, RecognitionSource, RecordingBucket};
pub use key::Key;
pub use state::{ControllerState, DenialReason, EnrollmentFailure, PinStage};
pub use types::{EnrollmentState, TemplateId, TemplateMatch, UserId, MAX_USER_ID, MIN_USER_ID};

/// Credential file format version
pub const CREDENTIAL_FILE_VERSION: u32 = 1;

/// Width of one line on the unit's character display
pub const LCD_WIDTH: usize = 16;
