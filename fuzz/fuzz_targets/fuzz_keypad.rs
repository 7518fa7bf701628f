#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use portcullis_core::{Key, UserId};
use portcullis_daemon::machine::{Command, Input, PinVerdict, RegistrationVerdict};
use portcullis_daemon::{ControllerConfig, Machine};

#[derive(Debug, Arbitrary)]
enum FuzzInput {
    Trigger,
    Key(u8),
    FingerMatched { user: Option<u16>, confidence: u16 },
    FingerNotMatched,
    SensorFault,
    PinAccepted(u16),
    PinRejected,
    LockedOut(u64),
    StoreFailure,
    TokenChecked(Option<u16>),
    FingerprintEnrolled(bool),
    PinRegistered(u8),
    EntryTimeout(u64),
    CooldownElapsed(u64),
}

impl FuzzInput {
    fn into_input(self) -> Option<Input> {
        Some(match self {
            FuzzInput::Trigger => Input::Trigger,
            FuzzInput::Key(b) => Input::Key(Key::from_char(char::from(b))?),
            FuzzInput::FingerMatched { user, confidence } => Input::FingerMatched {
                user_id: user.map(UserId),
                confidence,
            },
            FuzzInput::FingerNotMatched => Input::FingerNotMatched,
            FuzzInput::SensorFault => Input::SensorFault,
            FuzzInput::PinAccepted(u) => Input::PinChecked(PinVerdict::Accepted(UserId(u))),
            FuzzInput::PinRejected => Input::PinChecked(PinVerdict::Rejected),
            FuzzInput::LockedOut(s) => Input::PinChecked(PinVerdict::LockedOut { remaining_secs: s }),
            FuzzInput::StoreFailure => Input::PinChecked(PinVerdict::StoreFailure),
            FuzzInput::TokenChecked(u) => Input::TokenChecked(u.map(UserId)),
            FuzzInput::FingerprintEnrolled(ok) => Input::FingerprintEnrolled(ok),
            FuzzInput::PinRegistered(v) => Input::PinRegistered(match v % 4 {
                0 => RegistrationVerdict::Stored,
                1 => RegistrationVerdict::Rejected,
                2 => RegistrationVerdict::LockedOut {
                    remaining_secs: u64::from(v),
                },
                _ => RegistrationVerdict::StoreFailure,
            }),
            FuzzInput::EntryTimeout(generation) => Input::EntryTimeout { generation },
            FuzzInput::CooldownElapsed(generation) => Input::CooldownElapsed { generation },
        })
    }
}

fuzz_target!(|inputs: Vec<FuzzInput>| {
    let mut machine = Machine::new(ControllerConfig::default());
    let mut sessions = HashSet::new();

    for input in inputs.into_iter().filter_map(FuzzInput::into_input) {
        for command in machine.handle(input) {
            if let Command::Emit(event) = command {
                // One recognition event per session, never more
                assert!(sessions.insert(event.session_id()));
                assert!(machine.state().is_terminal());
            }
        }
    }
});
