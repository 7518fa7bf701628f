//! Controller states
//!
//! Feedback adapters (character display, GUI) subscribe to these and render
//! them; they carry no secrets, only digit counts.

use serde::{Deserialize, Serialize};

use crate::event::RecognitionSource;
use crate::types::UserId;
use crate::LCD_WIDTH;

/// Why a session ended unrecognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Too many wrong PINs in this session
    PinRejected,
    /// The keypad is locked out after repeated failures
    LockedOut { remaining_secs: u64 },
    /// PIN entry timed out
    Timeout,
    /// The credential store failed while verifying
    StoreFailure,
    /// The user pressed cancel
    Cancelled,
}

/// Which PIN prompt an enrolling user is at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinStage {
    Enter,
    Confirm,
}

/// Why a keypad enrollment ended without a new user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentFailure {
    Cancelled,
    Timeout,
    TokenRejected,
    SensorFailure,
    StoreFailure,
    /// Too many rejected codes or PINs; the keypad is locked
    LockedOut { remaining_secs: u64 },
}

/// State of the identification controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    /// Waiting for a trigger
    #[default]
    Idle,

    /// Fingerprint read in flight
    AwaitingBiometric { attempt: u32 },

    /// Fingerprint matched a known user above threshold
    Matched { user_id: UserId, confidence: u16 },

    /// Fingerprint read failed or found no match
    Failed,

    /// Collecting PIN digits
    AwaitingPin { digits: usize, attempts_left: u32 },

    /// PIN submitted, key derivation running
    VerifyingPin,

    /// Session granted access
    Recognized {
        user_id: UserId,
        source: RecognitionSource,
    },

    /// Session denied access
    Unrecognized { reason: DenialReason },

    /// Collecting a registration code after `A`
    EnteringToken { digits: usize },

    /// Registration code submitted
    VerifyingToken,

    /// Sensor is capturing the new user's finger
    EnrollingFingerprint { user_id: UserId },

    /// New user is choosing a PIN
    EnrollingPin {
        user_id: UserId,
        stage: PinStage,
        digits: usize,
    },

    /// New user's PIN is being stored
    SavingPin { user_id: UserId },

    /// Keypad enrollment finished
    EnrollmentDone { user_id: UserId },

    /// Keypad enrollment aborted
    EnrollmentFailed { reason: EnrollmentFailure },
}

impl ControllerState {
    /// States that end a session and start the cooldown
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Recognized { .. }
                | ControllerState::Unrecognized { .. }
                | ControllerState::EnrollmentDone { .. }
                | ControllerState::EnrollmentFailed { .. }
        )
    }

    /// Two lines for a 16x2 character display
    pub fn lcd_lines(&self) -> [String; 2] {
        let (top, bottom): (String, String) = match self {
            ControllerState::Idle => ("Enter PIN".into(), "or scan finger".into()),
            ControllerState::AwaitingBiometric { .. } => ("Scanning...".into(), String::new()),
            ControllerState::Matched { user_id, .. } => ("Match".into(), format!("ID {}", user_id)),
            ControllerState::Failed => ("Not recognized".into(), "Enter PIN".into()),
            ControllerState::AwaitingPin { digits, .. } => ("PIN entry:".into(), masked(*digits)),
            ControllerState::VerifyingPin | ControllerState::VerifyingToken => {
                ("Checking...".into(), String::new())
            }
            ControllerState::Recognized { user_id, .. } => {
                ("Access granted".into(), format!("ID {}", user_id))
            }
            ControllerState::Unrecognized { reason } => {
                let detail = match reason {
                    DenialReason::LockedOut { remaining_secs } => {
                        format!("Wait {}s", remaining_secs)
                    }
                    DenialReason::Timeout => "Timed out".into(),
                    DenialReason::StoreFailure => "System error".into(),
                    DenialReason::Cancelled => "Cancelled".into(),
                    DenialReason::PinRejected => String::new(),
                };
                ("Access denied".into(), detail)
            }
            ControllerState::EnteringToken { digits } => ("Reg. code:".into(), masked(*digits)),
            ControllerState::EnrollingFingerprint { .. } => {
                ("Place finger".into(), "to enroll".into())
            }
            ControllerState::EnrollingPin { stage, digits, .. } => {
                let header = match stage {
                    PinStage::Enter => "Choose PIN",
                    PinStage::Confirm => "Confirm PIN",
                };
                (header.into(), masked(*digits))
            }
            ControllerState::SavingPin { .. } => ("Saving...".into(), String::new()),
            ControllerState::EnrollmentDone { user_id } => {
                ("Registration OK".into(), format!("ID {}", user_id))
            }
            ControllerState::EnrollmentFailed { reason } => {
                let detail = match reason {
                    EnrollmentFailure::Cancelled => "cancelled".into(),
                    EnrollmentFailure::Timeout => "timed out".into(),
                    EnrollmentFailure::TokenRejected => "code rejected".into(),
                    EnrollmentFailure::SensorFailure => "sensor error".into(),
                    EnrollmentFailure::StoreFailure => "system error".into(),
                    EnrollmentFailure::LockedOut { remaining_secs } => {
                        format!("wait {}s", remaining_secs)
                    }
                };
                ("Registration".into(), detail)
            }
        };
        [clip(top), clip(bottom)]
    }
}

fn masked(digits: usize) -> String {
    "*".repeat(digits.min(LCD_WIDTH))
}

fn clip(mut line: String) -> String {
    line.truncate(LCD_WIDTH);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ControllerState::Idle.is_terminal());
        assert!(!ControllerState::VerifyingPin.is_terminal());
        assert!(ControllerState::Unrecognized {
            reason: DenialReason::Timeout
        }
        .is_terminal());
        assert!(ControllerState::EnrollmentDone {
            user_id: UserId::new(1)
        }
        .is_terminal());
    }

    #[test]
    fn test_lcd_lines_mask_digits() {
        let state = ControllerState::AwaitingPin {
            digits: 4,
            attempts_left: 3,
        };
        assert_eq!(state.lcd_lines(), ["PIN entry:".to_string(), "****".to_string()]);
    }

    #[test]
    fn test_lcd_lines_fit_display() {
        let state = ControllerState::Unrecognized {
            reason: DenialReason::LockedOut {
                remaining_secs: 3600,
            },
        };
        for line in state.lcd_lines() {
            assert!(line.len() <= LCD_WIDTH);
        }
    }

    #[test]
    fn test_enrollment_lockout_shows_wait() {
        let state = ControllerState::EnrollmentFailed {
            reason: EnrollmentFailure::LockedOut { remaining_secs: 120 },
        };
        assert_eq!(
            state.lcd_lines(),
            ["Registration".to_string(), "wait 120s".to_string()]
        );
    }
}
