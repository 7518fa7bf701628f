//! Identification state machine
//!
//! A pure transition table: [`Machine::handle`] takes one [`Input`] and
//! returns the [`Command`]s the driver must carry out. The machine does no
//! I/O and reads no clock beyond the timestamp handed to
//! [`Machine::handle_at`], so every transition is testable on its own.
//!
//! Timers are identified by a generation number. Every transition that
//! starts or cancels a timer bumps the generation, and a timer input whose
//! generation is stale is ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use portcullis_core::{
    ControllerState, DenialReason, EnrollmentFailure, Key, PinStage, RecognitionEvent,
    RecognitionSource, UserId,
};
use portcullis_vault::tokens::TOKEN_DIGITS;

use crate::config::ControllerConfig;

/// Digits typed at the keypad, wiped on drop and hidden from `Debug`
pub struct KeypadSecret(Zeroizing<String>);

impl KeypadSecret {
    pub fn new(digits: &str) -> Self {
        Self(Zeroizing::new(digits.to_owned()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeypadSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeypadSecret({} digits)", self.0.len())
    }
}

/// Result of a PIN check, as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerdict {
    Accepted(UserId),
    Rejected,
    LockedOut { remaining_secs: u64 },
    StoreFailure,
}

/// Result of storing an enrolling user's PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationVerdict {
    Stored,
    /// Weak or already taken; the user picks another
    Rejected,
    /// Too many rejected PINs; counts toward the keypad lockout
    LockedOut { remaining_secs: u64 },
    StoreFailure,
}

/// Everything that can happen to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Presence sensor fired
    Trigger,
    /// Keypad press
    Key(Key),
    /// Sensor matched a template; `user_id` is the registry lookup
    FingerMatched {
        user_id: Option<UserId>,
        confidence: u16,
    },
    /// Sensor read a finger that matched nothing
    FingerNotMatched,
    /// Sensor read failed or timed out
    SensorFault,
    PinChecked(PinVerdict),
    /// Registration code redeemed for this user, or rejected
    TokenChecked(Option<UserId>),
    /// New fingerprint captured and recorded
    FingerprintEnrolled(bool),
    PinRegistered(RegistrationVerdict),
    EntryTimeout { generation: u64 },
    CooldownElapsed { generation: u64 },
}

/// Work for the driver
#[derive(Debug)]
pub enum Command {
    /// Tell feedback subscribers about a new state
    Publish(ControllerState),
    ReadFingerprint,
    /// Abort whatever the sensor is doing
    CancelSensor,
    VerifyPin {
        pin: KeypadSecret,
        candidate: Option<UserId>,
    },
    RedeemToken {
        code: KeypadSecret,
    },
    EnrollFingerprint {
        user_id: UserId,
    },
    RegisterPin {
        user_id: UserId,
        pin: KeypadSecret,
    },
    ArmEntryTimeout {
        generation: u64,
    },
    ArmCooldown {
        generation: u64,
    },
    /// Deliver the session's recognition event
    Emit(RecognitionEvent),
}

/// The identification and keypad-enrollment state machine
pub struct Machine {
    config: ControllerConfig,
    state: ControllerState,
    session_id: u64,
    generation: u64,
    sensor_attempt: u32,
    /// User suggested by a low-confidence fingerprint match
    candidate: Option<UserId>,
    attempts_left: u32,
    buffer: Zeroizing<String>,
    /// First entry of an enrolling user's PIN, awaiting confirmation
    first_pin: Zeroizing<String>,
}

impl Machine {
    pub fn new(config: ControllerConfig) -> Self {
        let attempts_left = config.max_pin_attempts;
        Self {
            config,
            state: ControllerState::Idle,
            session_id: 0,
            generation: 0,
            sensor_attempt: 0,
            candidate: None,
            attempts_left,
            buffer: Zeroizing::new(String::new()),
            first_pin: Zeroizing::new(String::new()),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Id of the current (or last) identification session
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        self.handle_at(input, Utc::now())
    }

    /// Apply one input; `now` stamps any event emitted
    pub fn handle_at(&mut self, input: Input, now: DateTime<Utc>) -> Vec<Command> {
        let mut out = Vec::new();

        match self.state {
            ControllerState::Idle => self.on_idle(input, &mut out),
            ControllerState::AwaitingBiometric { .. } => self.on_biometric(input, now, &mut out),
            ControllerState::AwaitingPin { .. } => self.on_pin_entry(input, now, &mut out),
            ControllerState::VerifyingPin => self.on_pin_verdict(input, now, &mut out),
            ControllerState::EnteringToken { .. } => self.on_token_entry(input, &mut out),
            ControllerState::VerifyingToken => self.on_token_verdict(input, &mut out),
            ControllerState::EnrollingFingerprint { user_id } => {
                self.on_fingerprint_enrollment(user_id, input, &mut out)
            }
            ControllerState::EnrollingPin { user_id, stage, .. } => {
                self.on_enrollment_pin(user_id, stage, input, &mut out)
            }
            ControllerState::SavingPin { user_id } => self.on_pin_saved(user_id, input, &mut out),
            ControllerState::Recognized { .. }
            | ControllerState::Unrecognized { .. }
            | ControllerState::EnrollmentDone { .. }
            | ControllerState::EnrollmentFailed { .. } => self.on_cooldown(input, &mut out),
            // Pass-through states; the machine never rests in them
            ControllerState::Matched { .. } | ControllerState::Failed => {}
        }

        out
    }

    // ------------------------------------------------------------------
    // Identification
    // ------------------------------------------------------------------

    fn on_idle(&mut self, input: Input, out: &mut Vec<Command>) {
        match input {
            Input::Trigger
            | Input::Key(Key::Digit(_))
            | Input::Key(Key::Submit)
            | Input::Key(Key::Delete) => self.begin_identification(out),
            Input::Key(Key::Enroll) => self.begin_enrollment(out),
            _ => {}
        }
    }

    fn begin_identification(&mut self, out: &mut Vec<Command>) {
        self.session_id += 1;
        self.sensor_attempt = 1;
        self.candidate = None;
        self.attempts_left = self.config.max_pin_attempts;
        self.buffer.zeroize();
        self.generation += 1;

        debug!("Session {} started", self.session_id);
        self.enter(ControllerState::AwaitingBiometric { attempt: 1 }, out);
        out.push(Command::ReadFingerprint);
    }

    fn on_biometric(&mut self, input: Input, now: DateTime<Utc>, out: &mut Vec<Command>) {
        match input {
            Input::FingerMatched {
                user_id: Some(user_id),
                confidence,
            } if confidence >= self.config.match_confidence_threshold => {
                self.enter(ControllerState::Matched { user_id, confidence }, out);
                let event =
                    RecognitionEvent::fingerprint_match(self.session_id, user_id, confidence, now);
                self.finish_identification(
                    ControllerState::Recognized {
                        user_id,
                        source: RecognitionSource::Fingerprint,
                    },
                    event,
                    out,
                );
            }
            Input::FingerMatched {
                user_id: Some(user_id),
                confidence,
            } => {
                debug!(
                    "Low-confidence match ({}) for user {}, asking for PIN",
                    confidence, user_id
                );
                self.candidate = Some(user_id);
                self.start_pin_entry(None, out);
            }
            Input::FingerMatched { user_id: None, .. } | Input::FingerNotMatched => {
                self.enter(ControllerState::Failed, out);
                self.start_pin_entry(None, out);
            }
            Input::SensorFault => {
                if self.sensor_attempt <= self.config.max_sensor_retries {
                    self.sensor_attempt += 1;
                    self.enter(
                        ControllerState::AwaitingBiometric {
                            attempt: self.sensor_attempt,
                        },
                        out,
                    );
                    out.push(Command::ReadFingerprint);
                } else {
                    self.enter(ControllerState::Failed, out);
                    self.start_pin_entry(None, out);
                }
            }
            Input::Key(key) => {
                if let Some(digit) = key.digit_char() {
                    out.push(Command::CancelSensor);
                    self.start_pin_entry(Some(digit), out);
                } else if key == Key::Cancel {
                    out.push(Command::CancelSensor);
                    self.deny(DenialReason::Cancelled, RecognitionSource::Fingerprint, now, out);
                }
            }
            _ => {}
        }
    }

    fn start_pin_entry(&mut self, first_digit: Option<char>, out: &mut Vec<Command>) {
        self.buffer.zeroize();
        if let Some(digit) = first_digit {
            self.buffer.push(digit);
        }
        self.publish_pin_entry(out);
        self.maybe_auto_submit(out);
    }

    fn publish_pin_entry(&mut self, out: &mut Vec<Command>) {
        self.enter(
            ControllerState::AwaitingPin {
                digits: self.buffer.len(),
                attempts_left: self.attempts_left,
            },
            out,
        );
        self.arm_entry_timeout(out);
    }

    fn maybe_auto_submit(&mut self, out: &mut Vec<Command>) {
        if let Some(length) = self.config.pin_submit_length {
            if self.buffer.len() >= length {
                self.submit_pin(out);
            }
        }
    }

    fn on_pin_entry(&mut self, input: Input, now: DateTime<Utc>, out: &mut Vec<Command>) {
        match input {
            Input::Key(key) => {
                if let Some(digit) = key.digit_char() {
                    if self.buffer.len() < self.config.max_pin_digits {
                        self.buffer.push(digit);
                    }
                    self.publish_pin_entry(out);
                    self.maybe_auto_submit(out);
                    return;
                }
                match key {
                    Key::Delete => {
                        self.buffer.pop();
                        self.publish_pin_entry(out);
                    }
                    Key::Submit if self.buffer.len() < self.config.min_pin_digits => {
                        self.pin_rejected(now, out);
                    }
                    Key::Submit => self.submit_pin(out),
                    Key::Cancel => {
                        self.deny(DenialReason::Cancelled, RecognitionSource::Pin, now, out)
                    }
                    _ => {}
                }
            }
            Input::EntryTimeout { generation } if generation == self.generation => {
                debug!("PIN entry timed out in session {}", self.session_id);
                self.deny(DenialReason::Timeout, RecognitionSource::Pin, now, out);
            }
            _ => {}
        }
    }

    fn submit_pin(&mut self, out: &mut Vec<Command>) {
        let pin = self.take_buffer();
        self.generation += 1;
        self.enter(ControllerState::VerifyingPin, out);
        out.push(Command::VerifyPin {
            pin,
            candidate: self.candidate,
        });
    }

    fn on_pin_verdict(&mut self, input: Input, now: DateTime<Utc>, out: &mut Vec<Command>) {
        let Input::PinChecked(verdict) = input else {
            return;
        };

        match verdict {
            PinVerdict::Accepted(user_id) => {
                let event = RecognitionEvent::pin_fallback(self.session_id, user_id, now);
                self.finish_identification(
                    ControllerState::Recognized {
                        user_id,
                        source: RecognitionSource::Pin,
                    },
                    event,
                    out,
                );
            }
            PinVerdict::Rejected => self.pin_rejected(now, out),
            PinVerdict::LockedOut { remaining_secs } => self.deny(
                DenialReason::LockedOut { remaining_secs },
                RecognitionSource::Pin,
                now,
                out,
            ),
            PinVerdict::StoreFailure => {
                self.deny(DenialReason::StoreFailure, RecognitionSource::Pin, now, out)
            }
        }
    }

    fn pin_rejected(&mut self, now: DateTime<Utc>, out: &mut Vec<Command>) {
        self.attempts_left = self.attempts_left.saturating_sub(1);
        if self.attempts_left == 0 {
            self.deny(DenialReason::PinRejected, RecognitionSource::Pin, now, out);
        } else {
            self.start_pin_entry(None, out);
        }
    }

    fn deny(
        &mut self,
        reason: DenialReason,
        source: RecognitionSource,
        now: DateTime<Utc>,
        out: &mut Vec<Command>,
    ) {
        let event = RecognitionEvent::unrecognized(self.session_id, source, now);
        self.finish_identification(ControllerState::Unrecognized { reason }, event, out);
    }

    fn finish_identification(
        &mut self,
        state: ControllerState,
        event: RecognitionEvent,
        out: &mut Vec<Command>,
    ) {
        self.clear_secrets();
        self.candidate = None;
        self.enter(state, out);
        out.push(Command::Emit(event));
        self.start_cooldown(out);
    }

    // ------------------------------------------------------------------
    // Keypad enrollment
    // ------------------------------------------------------------------

    fn begin_enrollment(&mut self, out: &mut Vec<Command>) {
        self.clear_secrets();
        debug!("Registration code entry started");
        self.enter(ControllerState::EnteringToken { digits: 0 }, out);
        self.arm_entry_timeout(out);
    }

    fn on_token_entry(&mut self, input: Input, out: &mut Vec<Command>) {
        match input {
            Input::Key(key) => {
                if let Some(digit) = key.digit_char() {
                    if self.buffer.len() < TOKEN_DIGITS {
                        self.buffer.push(digit);
                    }
                    self.enter(
                        ControllerState::EnteringToken {
                            digits: self.buffer.len(),
                        },
                        out,
                    );
                    self.arm_entry_timeout(out);
                    return;
                }
                match key {
                    Key::Delete => {
                        self.buffer.pop();
                        self.enter(
                            ControllerState::EnteringToken {
                                digits: self.buffer.len(),
                            },
                            out,
                        );
                        self.arm_entry_timeout(out);
                    }
                    Key::Submit if self.buffer.len() == TOKEN_DIGITS => {
                        let code = self.take_buffer();
                        self.generation += 1;
                        self.enter(ControllerState::VerifyingToken, out);
                        out.push(Command::RedeemToken { code });
                    }
                    Key::Submit => self.fail_enrollment(EnrollmentFailure::TokenRejected, out),
                    Key::Cancel => self.fail_enrollment(EnrollmentFailure::Cancelled, out),
                    _ => {}
                }
            }
            Input::EntryTimeout { generation } if generation == self.generation => {
                self.fail_enrollment(EnrollmentFailure::Timeout, out)
            }
            _ => {}
        }
    }

    fn on_token_verdict(&mut self, input: Input, out: &mut Vec<Command>) {
        match input {
            Input::TokenChecked(Some(user_id)) => {
                self.enter(ControllerState::EnrollingFingerprint { user_id }, out);
                out.push(Command::EnrollFingerprint { user_id });
            }
            Input::TokenChecked(None) => {
                self.fail_enrollment(EnrollmentFailure::TokenRejected, out)
            }
            _ => {}
        }
    }

    fn on_fingerprint_enrollment(&mut self, user_id: UserId, input: Input, out: &mut Vec<Command>) {
        match input {
            Input::FingerprintEnrolled(true) => self.start_enrollment_pin(user_id, out),
            Input::FingerprintEnrolled(false) => {
                self.fail_enrollment(EnrollmentFailure::SensorFailure, out)
            }
            Input::Key(Key::Cancel) => {
                out.push(Command::CancelSensor);
                self.fail_enrollment(EnrollmentFailure::Cancelled, out);
            }
            _ => {}
        }
    }

    fn start_enrollment_pin(&mut self, user_id: UserId, out: &mut Vec<Command>) {
        self.clear_secrets();
        self.publish_enrollment_pin(user_id, PinStage::Enter, out);
    }

    fn publish_enrollment_pin(&mut self, user_id: UserId, stage: PinStage, out: &mut Vec<Command>) {
        self.enter(
            ControllerState::EnrollingPin {
                user_id,
                stage,
                digits: self.buffer.len(),
            },
            out,
        );
        self.arm_entry_timeout(out);
    }

    fn on_enrollment_pin(
        &mut self,
        user_id: UserId,
        stage: PinStage,
        input: Input,
        out: &mut Vec<Command>,
    ) {
        match input {
            Input::Key(key) => {
                if let Some(digit) = key.digit_char() {
                    if self.buffer.len() < self.config.max_pin_digits {
                        self.buffer.push(digit);
                    }
                    self.publish_enrollment_pin(user_id, stage, out);
                    return;
                }
                match key {
                    Key::Delete => {
                        self.buffer.pop();
                        self.publish_enrollment_pin(user_id, stage, out);
                    }
                    Key::Submit if self.buffer.len() < self.config.min_pin_digits => {
                        self.buffer.zeroize();
                        self.publish_enrollment_pin(user_id, stage, out);
                    }
                    Key::Submit => match stage {
                        PinStage::Enter => {
                            self.first_pin = self.take_buffer().0;
                            self.publish_enrollment_pin(user_id, PinStage::Confirm, out);
                        }
                        PinStage::Confirm if self.buffer.as_str() == self.first_pin.as_str() => {
                            let pin = self.take_buffer();
                            self.first_pin.zeroize();
                            self.generation += 1;
                            self.enter(ControllerState::SavingPin { user_id }, out);
                            out.push(Command::RegisterPin { user_id, pin });
                        }
                        PinStage::Confirm => {
                            debug!("PIN confirmation mismatch for user {}", user_id);
                            self.start_enrollment_pin(user_id, out);
                        }
                    },
                    Key::Cancel => self.fail_enrollment(EnrollmentFailure::Cancelled, out),
                    _ => {}
                }
            }
            Input::EntryTimeout { generation } if generation == self.generation => {
                self.fail_enrollment(EnrollmentFailure::Timeout, out)
            }
            _ => {}
        }
    }

    fn on_pin_saved(&mut self, user_id: UserId, input: Input, out: &mut Vec<Command>) {
        let Input::PinRegistered(verdict) = input else {
            return;
        };

        match verdict {
            RegistrationVerdict::Stored => {
                self.enter(ControllerState::EnrollmentDone { user_id }, out);
                self.start_cooldown(out);
            }
            RegistrationVerdict::Rejected => self.start_enrollment_pin(user_id, out),
            RegistrationVerdict::LockedOut { remaining_secs } => {
                self.fail_enrollment(EnrollmentFailure::LockedOut { remaining_secs }, out)
            }
            RegistrationVerdict::StoreFailure => {
                self.fail_enrollment(EnrollmentFailure::StoreFailure, out)
            }
        }
    }

    fn fail_enrollment(&mut self, reason: EnrollmentFailure, out: &mut Vec<Command>) {
        self.clear_secrets();
        self.enter(ControllerState::EnrollmentFailed { reason }, out);
        self.start_cooldown(out);
    }

    // ------------------------------------------------------------------
    // Shared
    // ------------------------------------------------------------------

    fn on_cooldown(&mut self, input: Input, out: &mut Vec<Command>) {
        if let Input::CooldownElapsed { generation } = input {
            if generation == self.generation {
                self.enter(ControllerState::Idle, out);
            }
        }
    }

    fn enter(&mut self, state: ControllerState, out: &mut Vec<Command>) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
        }
        self.state = state;
        out.push(Command::Publish(state));
    }

    fn arm_entry_timeout(&mut self, out: &mut Vec<Command>) {
        self.generation += 1;
        out.push(Command::ArmEntryTimeout {
            generation: self.generation,
        });
    }

    fn start_cooldown(&mut self, out: &mut Vec<Command>) {
        self.generation += 1;
        out.push(Command::ArmCooldown {
            generation: self.generation,
        });
    }

    fn take_buffer(&mut self) -> KeypadSecret {
        KeypadSecret(std::mem::replace(
            &mut self.buffer,
            Zeroizing::new(String::new()),
        ))
    }

    fn clear_secrets(&mut self) {
        self.buffer.zeroize();
        self.first_pin.zeroize();
    }
}
