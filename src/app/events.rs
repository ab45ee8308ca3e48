//! Outbound modem events.
//!
//! The [`ModemService`](super::service::ModemService) emits these through
//! the [`EventSink`](super::ports::EventSink) port and the
//! [`Subscribers`](super::subscribers::Subscribers) table.

use crate::at::urc::SignalQuality;
use crate::fsm::ModemState;

/// Voice call progress as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Ringing,
    Connected,
}

/// Structured events emitted by the modem service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    SmsReceived { message: String, sender: String },
    SmsSent { message: String, recipient: String },
    SmsSendFailed { error: String, recipient: String },
    IncomingCall { caller_id: String },
    CallConnected,
    CallDisconnected,
    UssdReceived { text: String },
    StateChanged { from: ModemState, to: ModemState },
    /// Registered binary sensor.
    RegistrationChanged(bool),
    /// RSSI sensor.
    SignalQuality(SignalQuality),
}

/// Discriminant of [`ModemEvent`], used to index subscriber lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    SmsReceived = 0,
    SmsSent = 1,
    SmsSendFailed = 2,
    IncomingCall = 3,
    CallConnected = 4,
    CallDisconnected = 5,
    UssdReceived = 6,
    StateChanged = 7,
    RegistrationChanged = 8,
    SignalQuality = 9,
}

impl EventKind {
    pub const COUNT: usize = 10;
}

impl ModemEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SmsReceived { .. } => EventKind::SmsReceived,
            Self::SmsSent { .. } => EventKind::SmsSent,
            Self::SmsSendFailed { .. } => EventKind::SmsSendFailed,
            Self::IncomingCall { .. } => EventKind::IncomingCall,
            Self::CallConnected => EventKind::CallConnected,
            Self::CallDisconnected => EventKind::CallDisconnected,
            Self::UssdReceived { .. } => EventKind::UssdReceived,
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::RegistrationChanged(_) => EventKind::RegistrationChanged,
            Self::SignalQuality(_) => EventKind::SignalQuality,
        }
    }
}
