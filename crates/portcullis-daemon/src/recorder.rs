//! Recognition sinks
//!
//! A sink receives the single [`RecognitionEvent`] of every identification
//! session. The camera recorder implements it to start a clip in the right
//! bucket; the bench daemon only logs.

use tracing::{info, warn};

use portcullis_core::{RecognitionEvent, RecognitionOutcome};

/// Consumer of recognition events
///
/// Called from the controller task, so implementations must hand long work
/// off rather than block.
pub trait RecognitionSink: Send + Sync {
    fn on_recognition_event(&self, event: RecognitionEvent);
}

/// Sink that writes each event to the log
#[derive(Debug, Default)]
pub struct LogRecorder;

impl RecognitionSink for LogRecorder {
    fn on_recognition_event(&self, event: RecognitionEvent) {
        let bucket = event.bucket().dir_name();
        match event.outcome() {
            RecognitionOutcome::Recognized {
                user_id,
                confidence,
            } => info!(
                "Session {}: user {} recognized by fingerprint (confidence {}), clip {}/{}",
                event.session_id(),
                user_id,
                confidence,
                bucket,
                event.clip_stem()
            ),
            RecognitionOutcome::PinFallbackUsed { user_id } => info!(
                "Session {}: user {} recognized by PIN, clip {}/{}",
                event.session_id(),
                user_id,
                bucket,
                event.clip_stem()
            ),
            RecognitionOutcome::Unrecognized => warn!(
                "Session {}: unrecognized via {:?}, clip {}/{}",
                event.session_id(),
                event.source(),
                bucket,
                event.clip_stem()
            ),
        }
    }
}
