//! Core identifiers and enrollment state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowest user ID, also the first template slot on the sensor
pub const MIN_USER_ID: u16 = 1;
/// Highest user ID (the sensor stores templates in slots 1..=127)
pub const MAX_USER_ID: u16 = 127;

/// Stable user identifier
///
/// A user's ID doubles as the sensor slot their fingerprint template is
/// stored in, so valid IDs are bounded by the sensor's library size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u16);

impl UserId {
    /// Create a new UserId
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn get(&self) -> u16 {
        self.0
    }

    /// Whether this ID fits in the sensor's template library
    pub fn is_sensor_slot(&self) -> bool {
        (MIN_USER_ID..=MAX_USER_ID).contains(&self.0)
    }

    /// Iterate over every assignable user ID in ascending order
    pub fn all_slots() -> impl Iterator<Item = UserId> {
        (MIN_USER_ID..=MAX_USER_ID).map(UserId)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Opaque template identifier assigned by the fingerprint sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub u16);

impl TemplateId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A positive match reported by the sensor's own matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMatch {
    /// Template that matched
    pub id: TemplateId,
    /// Sensor confidence score (higher is better; scale is sensor-defined)
    pub confidence: u16,
}

/// Enrollment lifecycle of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    /// Record exists, no samples collected yet
    #[default]
    Pending,

    /// Samples are being accumulated across sessions
    Collecting,

    /// Enough quality samples collected; never regresses
    Complete,
}

impl EnrollmentState {
    /// Check if enrollment has finished
    pub fn is_complete(&self) -> bool {
        matches!(self, EnrollmentState::Complete)
    }

    /// Check if further samples should be collected for this user
    pub fn wants_samples(&self) -> bool {
        !self.is_complete()
    }
}

impl fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrollmentState::Pending => "pending",
            EnrollmentState::Collecting => "collecting",
            EnrollmentState::Complete => "complete",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_slot_bounds() {
        assert!(!UserId::new(0).is_sensor_slot());
        assert!(UserId::new(1).is_sensor_slot());
        assert!(UserId::new(127).is_sensor_slot());
        assert!(!UserId::new(128).is_sensor_slot());
        assert_eq!(UserId::all_slots().count(), 127);
    }

    #[test]
    fn test_user_id_parse() {
        assert_eq!(" 42 ".parse::<UserId>().unwrap(), UserId::new(42));
        assert!("abc".parse::<UserId>().is_err());
    }

    #[test]
    fn test_enrollment_state_serializes_snake_case() {
        let json = serde_json::to_string(&EnrollmentState::Collecting).unwrap();
        assert_eq!(json, "\"collecting\"");
        assert!(EnrollmentState::Pending.wants_samples());
        assert!(!EnrollmentState::Complete.wants_samples());
    }
}
