//! Keypad keys
//!
//! The unit uses a 4x4 matrix keypad. Digits enter PINs and codes, `#`
//! submits, `*` deletes the last digit, `A` starts entry of a registration
//! code and `D` cancels an enrollment.

use serde::{Deserialize, Serialize};

/// A single key press delivered by the keypad adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Digit 0-9
    Digit(u8),
    /// `#`
    Submit,
    /// `*`
    Delete,
    /// `A`
    Enroll,
    /// `D`
    Cancel,
    /// `B` or `C`, currently unassigned
    Aux(char),
}

impl Key {
    /// Map a keypad legend character to a key
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            d @ '0'..='9' => Some(Key::Digit(d as u8 - b'0')),
            '#' => Some(Key::Submit),
            '*' => Some(Key::Delete),
            'A' => Some(Key::Enroll),
            'D' => Some(Key::Cancel),
            c @ ('B' | 'C') => Some(Key::Aux(c)),
            _ => None,
        }
    }

    /// The digit character, if this is a digit key
    pub fn digit_char(&self) -> Option<char> {
        match self {
            Key::Digit(d) => char::from_digit(u32::from(*d), 10),
            _ => None,
        }
    }
}
