//! Fingerprint sensor abstraction
//!
//! The sensor's own firmware does the matching; the controller only sees a
//! template id and a confidence score. Implementations own the device handle
//! and must leave it usable if a read is dropped mid-flight, since the
//! controller aborts reads the user no longer needs.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use portcullis_core::{TemplateId, TemplateMatch, UserId};

/// Outcome of one fingerprint read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    /// The sensor matched a stored template
    Match(TemplateMatch),
    /// A finger was read but matched nothing
    NoMatch,
}

/// Transient sensor failures; the controller retries these
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorFault {
    #[error("No finger presented before the timeout")]
    Timeout,

    #[error("Sensor communication error: {0}")]
    Communication(String),

    #[error("Captured images did not agree")]
    ImageMismatch,

    #[error("Sensor template library is full")]
    LibraryFull,

    #[error("Sensor not available")]
    Unavailable,
}

/// Trait for fingerprint sensors
#[async_trait]
pub trait BiometricSensor: Send + Sync {
    /// Wait up to `timeout` for a finger and search the template library
    async fn read_fingerprint(&self, timeout: Duration) -> Result<SensorReading, SensorFault>;

    /// Capture a new finger into `slot`, returning the stored template
    async fn enroll_fingerprint(
        &self,
        slot: UserId,
        timeout: Duration,
    ) -> Result<TemplateId, SensorFault>;

    /// Delete a stored template
    async fn delete_template(&self, template: TemplateId) -> Result<(), SensorFault>;

    /// Short device name for logs
    fn device_type(&self) -> &'static str;
}

/// Bench stand-in for a sensor nobody touches
///
/// Every read waits out its timeout and reports [`SensorFault::Timeout`], so
/// sessions fall through to PIN entry as they would at a unit whose user
/// skipped the finger.
#[derive(Debug, Default)]
pub struct AbsentFingerSensor;

#[async_trait]
impl BiometricSensor for AbsentFingerSensor {
    async fn read_fingerprint(&self, timeout: Duration) -> Result<SensorReading, SensorFault> {
        tokio::time::sleep(timeout).await;
        Err(SensorFault::Timeout)
    }

    async fn enroll_fingerprint(
        &self,
        slot: UserId,
        timeout: Duration,
    ) -> Result<TemplateId, SensorFault> {
        debug!("Bench sensor asked to enroll slot {}", slot);
        tokio::time::sleep(timeout).await;
        Err(SensorFault::Timeout)
    }

    async fn delete_template(&self, _template: TemplateId) -> Result<(), SensorFault> {
        Ok(())
    }

    fn device_type(&self) -> &'static str {
        "absent-finger"
    }
}
