//! Session lifecycle state machine.
//!
//! ```text
//! Inactive --Activate--> Active --Close--> Draining --Terminate--> Terminated
//! ```
//!
//! [`transition`] is pure; the session applies it under its state lock and
//! performs the side effects of each edge.

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, handlers may be registered, nothing is intercepted.
    Inactive,
    /// Hook installed, server running, calls are dispatched.
    Active,
    /// Interception off, final flush sent, waiting out the grace period.
    Draining,
    /// Server stopped. Terminal.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCommand {
    Activate,
    Close,
    Terminate,
}

pub fn transition(
    from: SessionState,
    command: SessionCommand,
) -> Result<SessionState, SessionError> {
    use SessionCommand::*;
    use SessionState::*;

    match (from, command) {
        (Inactive, Activate) => Ok(Active),
        (Active, Close) => Ok(Draining),
        (Draining, Terminate) => Ok(Terminated),
        _ => Err(SessionError::InvalidTransition { from, command }),
    }
}
