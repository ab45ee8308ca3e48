//! Concrete state handler functions and table builder.
//!
//! ```text
//!  UNINITIALIZED ──[SIM PIN]──▶ PIN_REQUIRED ──[READY]──┐
//!        │                                              ▼
//!        ├──────────[READY]──────────────────────▶ REGISTERING
//!        │                                          │      ▲
//!        └──[READY, registered]──▶ REGISTERED ◀─[reg]┘      │
//!                                      └────[reg lost]──────┘
//!
//!  Any state ──[transport failure]──▶ ERROR (until reinitialise)
//! ```

use super::context::{SessionContext, SessionRequest};
use super::{ModemState, StateDescriptor};
use crate::at::urc::SimStatus;
use log::{error, info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; ModemState::COUNT] {
    [
        StateDescriptor {
            id: ModemState::Uninitialized,
            name: "Uninitialized",
            on_enter: Some(uninitialized_enter),
            on_exit: None,
            on_update: uninitialized_update,
        },
        StateDescriptor {
            id: ModemState::PinRequired,
            name: "PinRequired",
            on_enter: Some(pin_required_enter),
            on_exit: None,
            on_update: pin_required_update,
        },
        StateDescriptor {
            id: ModemState::Registering,
            name: "Registering",
            on_enter: Some(registering_enter),
            on_exit: None,
            on_update: registering_update,
        },
        StateDescriptor {
            id: ModemState::Registered,
            name: "Registered",
            on_enter: Some(registered_enter),
            on_exit: None,
            on_update: registered_update,
        },
        StateDescriptor {
            id: ModemState::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: None,
            on_update: error_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  UNINITIALIZED — waiting for the modem to boot and answer
// ═══════════════════════════════════════════════════════════════════════════

fn uninitialized_enter(ctx: &mut SessionContext) {
    ctx.next_probe_ms = ctx.now_ms + u64::from(ctx.config.boot_delay_ms);
    if ctx.link.modem_ready {
        ctx.next_probe_ms = ctx.now_ms;
    }
    info!(
        "UNINITIALIZED: first probe in {} ms",
        ctx.next_probe_ms - ctx.now_ms
    );
}

fn uninitialized_update(ctx: &mut SessionContext) -> Option<ModemState> {
    if ctx.link.transport_failed {
        return Some(ModemState::Error);
    }

    if !ctx.link.probe_ok {
        if ctx.now_ms >= ctx.next_probe_ms {
            ctx.request(SessionRequest::Probe);
        }
        return None;
    }

    if !ctx.link.setup_sent {
        ctx.link.setup_sent = true;
        ctx.request(SessionRequest::IdentifyModel);
        ctx.request(SessionRequest::VerboseErrors);
        ctx.request(SessionRequest::EnableCallerId);
        ctx.request(SessionRequest::QuerySim);
        ctx.reset_poll();
    }

    match &ctx.link.sim {
        SimStatus::Ready if ctx.link.is_registered() => Some(ModemState::Registered),
        SimStatus::Ready => Some(ModemState::Registering),
        SimStatus::PinRequired => Some(ModemState::PinRequired),
        SimStatus::Locked(reason) => {
            if !ctx.link.lock_reported {
                ctx.link.lock_reported = true;
                error!("UNINITIALIZED: SIM unusable ({})", reason);
            }
            if ctx.poll_due() {
                ctx.request(SessionRequest::QuerySim);
            }
            None
        }
        SimStatus::Unknown => {
            if ctx.poll_due() {
                ctx.request(SessionRequest::QuerySim);
            }
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  PIN_REQUIRED — SIM locked, configured PIN entered once
// ═══════════════════════════════════════════════════════════════════════════

fn pin_required_enter(ctx: &mut SessionContext) {
    ctx.reset_poll();
    if ctx.config.pin_code.is_none() {
        error!("PIN_REQUIRED: No pin_code configured");
        return;
    }
    if ctx.link.pin_sent {
        warn!("PIN_REQUIRED: PIN already tried, not retrying");
        return;
    }
    info!("PIN_REQUIRED: entering configured PIN");
    ctx.link.pin_sent = true;
    ctx.request(SessionRequest::EnterPin);
}

fn pin_required_update(ctx: &mut SessionContext) -> Option<ModemState> {
    if ctx.link.transport_failed {
        return Some(ModemState::Error);
    }

    if ctx.link.sim == SimStatus::Ready {
        info!("PIN_REQUIRED: SIM unlocked");
        return Some(ModemState::Registering);
    }

    if ctx.poll_due() {
        ctx.request(SessionRequest::QuerySim);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  REGISTERING — SIM ready, waiting for the network
// ═══════════════════════════════════════════════════════════════════════════

fn registering_enter(ctx: &mut SessionContext) {
    info!("REGISTERING: waiting for network registration");
    ctx.reset_poll();
    ctx.request(SessionRequest::QueryRegistration);
    ctx.request(SessionRequest::QuerySignal);
}

fn registering_update(ctx: &mut SessionContext) -> Option<ModemState> {
    if ctx.link.transport_failed {
        return Some(ModemState::Error);
    }

    if let Some(reg) = ctx.link.registration {
        if reg.is_registered() {
            return Some(ModemState::Registered);
        }
        if reg.reporting_disabled() && !ctx.link.reg_enable_sent {
            ctx.link.reg_enable_sent = true;
            ctx.request(SessionRequest::EnableRegistration);
        }
    }

    poll_network(ctx);
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  REGISTERED — network available, actions flow
// ═══════════════════════════════════════════════════════════════════════════

fn registered_enter(ctx: &mut SessionContext) {
    ctx.reset_poll();
    info!("REGISTERED: network available");
}

fn registered_update(ctx: &mut SessionContext) -> Option<ModemState> {
    if ctx.link.transport_failed {
        return Some(ModemState::Error);
    }

    if !ctx.link.is_registered() {
        warn!("REGISTERED: network lost");
        return Some(ModemState::Registering);
    }

    poll_network(ctx);
    None
}

fn poll_network(ctx: &mut SessionContext) {
    if ctx.poll_due() {
        ctx.request(SessionRequest::QueryRegistration);
        ctx.request(SessionRequest::QuerySignal);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR — transport gone; terminal until reinitialise
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &mut SessionContext) {
    ctx.requests.clear();
    error!("ERROR: modem session stopped, reinitialise to recover");
}

fn error_update(_ctx: &mut SessionContext) -> Option<ModemState> {
    None
}
