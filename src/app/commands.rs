//! Inbound actions for the modem service.
//!
//! These are the operations the outside world (automations, a console,
//! another task via [`ActionQueue`](crate::at::channels::ActionQueue)) asks
//! the [`ModemService`](super::service::ModemService) to perform.

use crate::error::Error;

/// Receives the raw modem answer to [`ModemCommand::SendAt`].
pub type AtReply = Box<dyn FnOnce(Result<String, Error>) + Send>;

/// Actions accepted by the modem service.
pub enum ModemCommand {
    /// Send a text-mode SMS.
    SendSms { recipient: String, message: String },

    /// Place a voice call.
    Dial { recipient: String },

    /// Answer the ringing call.
    Connect,

    /// Hang up the current call.
    Disconnect,

    /// Send a USSD code (e.g. `*100#`).
    SendUssd { code: String },

    /// Raw AT command.  The reply gets every response line unmodified,
    /// final result code included.
    SendAt {
        command: String,
        reply: Option<AtReply>,
    },

    /// Log the TX/RX stream at `info` level.
    DebugOn,

    /// Back to `debug` level.
    DebugOff,
}

impl ModemCommand {
    /// Needs a registered network; deferred until then.
    pub fn needs_network(&self) -> bool {
        matches!(
            self,
            Self::SendSms { .. } | Self::Dial { .. } | Self::SendUssd { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SendSms { .. } => "send_sms",
            Self::Dial { .. } => "dial",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::SendUssd { .. } => "send_ussd",
            Self::SendAt { .. } => "send_at",
            Self::DebugOn => "debug_on",
            Self::DebugOff => "debug_off",
        }
    }
}

impl core::fmt::Debug for ModemCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SendSms { recipient, message } => f
                .debug_struct("SendSms")
                .field("recipient", recipient)
                .field("message", message)
                .finish(),
            Self::Dial { recipient } => f.debug_struct("Dial").field("recipient", recipient).finish(),
            Self::SendUssd { code } => f.debug_struct("SendUssd").field("code", code).finish(),
            Self::SendAt { command, reply } => f
                .debug_struct("SendAt")
                .field("command", command)
                .field("reply", &reply.is_some())
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}
