//! Portcullis Daemon - Identification controller for the access unit
//!
//! This crate provides:
//! - The fingerprint-then-PIN identification state machine
//! - An async controller that drives it from sensor, keypad and timer tasks
//! - Keypad enrollment with single-use registration codes
//! - Adapters for the sensor, recorder, feedback display and console keypad

pub mod config;
pub mod controller;
pub mod enrollment;
pub mod error;
pub mod feedback;
pub mod keypad;
pub mod machine;
pub mod recorder;
pub mod sensor;

pub use config::{ControllerConfig, DaemonConfig};
pub use controller::{Controller, ControllerHandle};
pub use enrollment::EnrollmentService;
pub use error::{DaemonError, Result};
pub use machine::{Command, Input, Machine};
pub use recorder::{LogRecorder, RecognitionSink};
pub use sensor::{AbsentFingerSensor, BiometricSensor, SensorFault, SensorReading};
