//! Recognition events
//!
//! Exactly one [`RecognitionEvent`] is produced per identification session.
//! Fields are private so an event cannot be altered after it is emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Which factor produced the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionSource {
    Fingerprint,
    Pin,
}

/// Outcome of an identification session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    /// Fingerprint matched a known user above the confidence threshold
    Recognized {
        user_id: UserId,
        confidence: u16,
    },

    /// Nobody was identified
    Unrecognized,

    /// Fingerprint failed or was ambiguous; the user identified by PIN
    PinFallbackUsed {
        user_id: UserId,
    },
}

impl RecognitionOutcome {
    /// The identified user, if any
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            RecognitionOutcome::Recognized { user_id, .. }
            | RecognitionOutcome::PinFallbackUsed { user_id } => Some(*user_id),
            RecognitionOutcome::Unrecognized => None,
        }
    }

    /// Whether access should be granted
    pub fn grants_access(&self) -> bool {
        self.user_id().is_some()
    }
}

/// Where the recorder files the clip for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingBucket {
    Recognized,
    Unrecognized,
}

impl RecordingBucket {
    /// Directory name used for clips in this bucket
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordingBucket::Recognized => "recognized",
            RecordingBucket::Unrecognized => "unrecognized",
        }
    }
}

/// Immutable record of one identification session's outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    session_id: u64,
    outcome: RecognitionOutcome,
    source: RecognitionSource,
    timestamp: DateTime<Utc>,
}

impl RecognitionEvent {
    /// Fingerprint matched above the threshold
    pub fn fingerprint_match(
        session_id: u64,
        user_id: UserId,
        confidence: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            outcome: RecognitionOutcome::Recognized {
                user_id,
                confidence,
            },
            source: RecognitionSource::Fingerprint,
            timestamp,
        }
    }

    /// User identified through the PIN fallback
    pub fn pin_fallback(session_id: u64, user_id: UserId, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id,
            outcome: RecognitionOutcome::PinFallbackUsed { user_id },
            source: RecognitionSource::Pin,
            timestamp,
        }
    }

    /// Session ended without identifying anyone
    pub fn unrecognized(
        session_id: u64,
        source: RecognitionSource,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            outcome: RecognitionOutcome::Unrecognized,
            source,
            timestamp,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn outcome(&self) -> RecognitionOutcome {
        self.outcome
    }

    pub fn source(&self) -> RecognitionSource {
        self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Recording bucket for this event
    pub fn bucket(&self) -> RecordingBucket {
        if self.outcome.grants_access() {
            RecordingBucket::Recognized
        } else {
            RecordingBucket::Unrecognized
        }
    }

    /// Clip file stem the recorder should use, e.g. `20240101_120000_7`
    pub fn clip_stem(&self) -> String {
        let ts = self.timestamp.format("%Y%m%d_%H%M%S");
        match self.outcome.user_id() {
            Some(user) => format!("{}_{}", ts, user),
            None => format!("{}_UNKNOWN", ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_buckets() {
        let hit = RecognitionEvent::fingerprint_match(1, UserId::new(7), 120, at());
        assert_eq!(hit.bucket(), RecordingBucket::Recognized);
        assert_eq!(hit.source(), RecognitionSource::Fingerprint);

        let pin = RecognitionEvent::pin_fallback(2, UserId::new(7), at());
        assert_eq!(pin.bucket(), RecordingBucket::Recognized);
        assert_eq!(pin.outcome().user_id(), Some(UserId::new(7)));

        let miss = RecognitionEvent::unrecognized(3, RecognitionSource::Pin, at());
        assert_eq!(miss.bucket(), RecordingBucket::Unrecognized);
        assert!(!miss.outcome().grants_access());
    }

    #[test]
    fn test_clip_stem() {
        let hit = RecognitionEvent::fingerprint_match(1, UserId::new(7), 120, at());
        assert_eq!(hit.clip_stem(), "20240501_083000_7");

        let miss = RecognitionEvent::unrecognized(3, RecognitionSource::Pin, at());
        assert_eq!(miss.clip_stem(), "20240501_083000_UNKNOWN");
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RecognitionOutcome::PinFallbackUsed {
            user_id: UserId::new(3),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"kind":"pin_fallback_used","user_id":3}"#);
    }
}
