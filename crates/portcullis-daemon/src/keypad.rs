//! Console keypad
//!
//! Bench stand-in for the matrix keypad: each character typed on stdin is a
//! key press, and `t` fires the presence trigger.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use portcullis_core::Key;

use crate::controller::ControllerHandle;
use crate::error::Result;

/// What a typed character means to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    Trigger,
    Key(Key),
}

/// Map one console character
pub fn parse_console_char(c: char) -> Option<ConsoleInput> {
    match c {
        't' | 'T' => Some(ConsoleInput::Trigger),
        _ => Key::from_char(c).map(ConsoleInput::Key),
    }
}

/// Forward stdin to the controller until EOF
pub async fn run_console_keypad(handle: ControllerHandle) -> Result<()> {
    info!("Console keypad ready: digits, # submit, * delete, A enroll, D cancel, t trigger");
    forward_lines(BufReader::new(tokio::io::stdin()), handle).await
}

/// Forward every key in `reader` to the controller until EOF
pub async fn forward_lines<R>(reader: R, handle: ControllerHandle) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        for c in line.chars().filter(|c| !c.is_whitespace()) {
            match parse_console_char(c) {
                Some(ConsoleInput::Trigger) => handle.trigger().await?,
                Some(ConsoleInput::Key(key)) => handle.press(key).await?,
                None => debug!("Ignoring console input {:?}", c),
            }
        }
    }
    debug!("Console keypad reached end of input");
    Ok(())
}
