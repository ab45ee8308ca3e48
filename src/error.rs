//! Unified error types for the modem session manager.
//!
//! A single `Error` enum that every layer (dispatcher, URC parser, session)
//! converts into, so completion handlers and reply closures deal with one
//! type.  Action-level failures are delivered through callbacks carrying
//! this error; nothing here is ever raised into the control loop.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level modem error
// ---------------------------------------------------------------------------

/// Every fallible modem operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No final response within the deadline, after all retries.
    Timeout,
    /// The modem answered with an explicit error line (`ERROR`,
    /// `+CME ERROR: ...`, `+CMS ERROR: ...`).  Carries the raw line.
    Modem(String),
    /// The serial channel failed.  Fatal for the session.
    Transport(String),
    /// A line could not be decoded.  Never fatal; the line is dropped.
    Parse(&'static str),
    /// The command queue is full.
    QueueFull,
    /// The command was cancelled by component shutdown.
    Cancelled,
    /// The session cannot accept the request in its current state.
    Unavailable,
}

impl Error {
    /// Text handed to failure callbacks (`on_sms_send_failed`).
    ///
    /// For modem errors this is the raw response line, unmodified.
    pub fn callback_text(&self) -> String {
        match self {
            Self::Modem(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Modem(raw) => write!(f, "modem error: {raw}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Parse(what) => write!(f, "parse: {what}"),
            Self::QueueFull => write!(f, "command queue full"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unavailable => write!(f, "modem unavailable"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
