//! Cross-task action posting.
//!
//! Uses an `embassy-sync` bounded channel so tasks other than the control
//! loop can request modem actions without touching the service.  The
//! control loop drains it with
//! [`ModemService::drain_actions`](crate::app::service::ModemService::drain_actions).
//!
//! ```text
//! ┌──────────────┐  ModemCommand  ┌──────────────┐
//! │  any task    │──────────────▶│ control loop  │
//! └──────────────┘                └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::app::commands::ModemCommand;

/// Channel depth for posted actions.
pub const ACTION_DEPTH: usize = 8;

/// Action channel type: producers `try_send`, the control loop drains.
pub type ActionQueue = Channel<CriticalSectionRawMutex, ModemCommand, ACTION_DEPTH>;

/// Process-wide action channel used by the firmware binary.
pub static ACTION_CHANNEL: ActionQueue = Channel::new();

/// Post an action without blocking.  Hands it back when the channel is full.
pub fn post(queue: &ActionQueue, command: ModemCommand) -> Result<(), ModemCommand> {
    queue.try_send(command).map_err(|e| match e {
        embassy_sync::channel::TrySendError::Full(c) => c,
    })
}
