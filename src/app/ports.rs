//! Port traits — the hexagonal boundary between the session logic and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ModemService (domain)
//! ```
//!
//! The serial link is the [`Transport`](crate::at::transport::Transport)
//! port; the power key is an `embedded-hal` [`OutputPin`].  The service
//! consumes them via generics, so it never touches hardware directly.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use super::events::ModemEvent;

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`ModemEvent`]s through this port.
/// Adapters decide where they go (serial log, MQTT, display, ...).
pub trait EventSink {
    fn emit(&mut self, event: &ModemEvent);
}

// ───────────────────────────────────────────────────────────────
// Power pin
// ───────────────────────────────────────────────────────────────

/// Stand-in for boards without a modem power key line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPowerPin;

impl ErrorType for NoPowerPin {
    type Error = Infallible;
}

impl OutputPin for NoPowerPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}
