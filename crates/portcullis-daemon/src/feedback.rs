//! User feedback
//!
//! Controller states are broadcast; a feedback adapter renders them. The
//! unit drives a 16x2 LCD and a buzzer. The bench daemon logs the two LCD
//! lines instead.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use portcullis_core::ControllerState;

/// Render controller states to the log until the controller goes away
pub async fn log_feedback(mut states: broadcast::Receiver<ControllerState>) {
    loop {
        match states.recv().await {
            Ok(state) => {
                let [top, bottom] = state.lcd_lines();
                if state.is_terminal() {
                    info!("[LCD] {:<16} | {}", top, bottom);
                } else {
                    debug!("[LCD] {:<16} | {}", top, bottom);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Feedback fell behind, {} states skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Feedback task stopped");
}
