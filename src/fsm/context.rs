//! Shared mutable context threaded through every FSM handler.
//!
//! `SessionContext` is the blackboard between the session state machine
//! and the service: the service writes what it learned from the modem
//! ([`LinkStatus`]), the handlers read it and queue [`SessionRequest`]s,
//! which the service drains and turns into AT commands.

use core::time::Duration;

use log::warn;

use crate::at::command::{Command, ResponseMatcher};
use crate::at::urc::{Registration, SimStatus};
use crate::config::ModemConfig;

/// Capacity of the request list; a tick never queues more than this.
pub const MAX_REQUESTS: usize = 8;

// ---------------------------------------------------------------------------
// Session requests (written by handlers; drained by the service)
// ---------------------------------------------------------------------------

/// Commands the session itself needs sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionRequest {
    /// `ATE0` — liveness probe, also disables echo.
    Probe,
    /// `AT+CGMM`
    IdentifyModel,
    /// `AT+CMEE=2` — textual `+CME ERROR:` reasons.
    VerboseErrors,
    /// `AT+CLIP=1`
    EnableCallerId,
    /// `AT+CPIN?`
    QuerySim,
    /// `AT+CPIN=<pin>`
    EnterPin,
    /// `AT+CREG?`
    QueryRegistration,
    /// `AT+CREG=1`
    EnableRegistration,
    /// `AT+CSQ`
    QuerySignal,
}

impl SessionRequest {
    /// Build the AT command for this request.
    pub fn command(self, config: &ModemConfig) -> Command {
        let timeout = Duration::from_millis(u64::from(config.command_timeout_ms));
        let retries = config.command_retries;
        match self {
            Self::Probe => Command::new("ATE0", timeout, retries),
            Self::IdentifyModel => {
                Command::new("AT+CGMM", timeout, retries).with_matcher(ResponseMatcher::Raw)
            }
            Self::VerboseErrors => Command::new("AT+CMEE=2", timeout, retries),
            Self::EnableCallerId => Command::new("AT+CLIP=1", timeout, retries),
            Self::QuerySim => Command::new("AT+CPIN?", timeout, retries)
                .with_matcher(ResponseMatcher::Prefix("+CPIN:")),
            // A wrong PIN must not be retried: every attempt burns one try.
            Self::EnterPin => Command::new(
                format!("AT+CPIN={}", config.pin_code.as_deref().unwrap_or_default()),
                timeout,
                0,
            ),
            Self::QueryRegistration => Command::new("AT+CREG?", timeout, retries)
                .with_matcher(ResponseMatcher::Prefix("+CREG:")),
            Self::EnableRegistration => Command::new("AT+CREG=1", timeout, retries),
            Self::QuerySignal => Command::new("AT+CSQ", timeout, retries)
                .with_matcher(ResponseMatcher::Prefix("+CSQ:")),
        }
    }
}

// ---------------------------------------------------------------------------
// Link status (written by the service)
// ---------------------------------------------------------------------------

/// Modem family, from `AT+CGMM`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModemModel {
    #[default]
    Unknown,
    A76xx,
    Sim8xx,
    Other(String),
}

impl ModemModel {
    pub fn detect(cgmm: &str) -> Self {
        let id = cgmm.trim();
        if id.starts_with("A76") {
            Self::A76xx
        } else if id.contains("SIM8") {
            Self::Sim8xx
        } else {
            Self::Other(id.to_owned())
        }
    }
}

impl core::fmt::Display for ModemModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::A76xx => f.write_str("A76xx"),
            Self::Sim8xx => f.write_str("SIM8xx"),
            Self::Other(id) => f.write_str(id),
        }
    }
}

/// What the session knows about the modem.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    /// `*ATREADY: 1` / `RDY` seen since the last power cycle.
    pub modem_ready: bool,
    /// The probe was answered.
    pub probe_ok: bool,
    /// Post-probe setup commands queued.
    pub setup_sent: bool,
    pub sim: SimStatus,
    /// The configured PIN has been sent (once per session).
    pub pin_sent: bool,
    pub registration: Option<Registration>,
    /// `AT+CREG=1` queued.
    pub reg_enable_sent: bool,
    pub transport_failed: bool,
    pub model: ModemModel,
    /// Consecutive unanswered probes.
    pub probe_failures: u32,
    /// A locked SIM has been reported; avoids repeating the log.
    pub lock_reported: bool,
}

impl LinkStatus {
    pub fn is_registered(&self) -> bool {
        self.registration.is_some_and(|r| r.is_registered())
    }
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct SessionContext {
    // -- Timing --
    /// Monotonic milliseconds, set by the service before each tick.
    pub now_ms: u64,
    /// Time of the last status poll.
    pub last_poll_ms: u64,
    /// Earliest time for the next probe.
    pub next_probe_ms: u64,

    pub config: ModemConfig,
    pub link: LinkStatus,

    /// Output: commands to send, drained by the service after each tick.
    pub requests: heapless::Vec<SessionRequest, MAX_REQUESTS>,
}

impl SessionContext {
    pub fn new(config: ModemConfig) -> Self {
        Self {
            now_ms: 0,
            last_poll_ms: 0,
            next_probe_ms: 0,
            config,
            link: LinkStatus::default(),
            requests: heapless::Vec::new(),
        }
    }

    /// Queue a request; duplicates within a tick are folded.
    pub fn request(&mut self, request: SessionRequest) {
        if self.requests.contains(&request) {
            return;
        }
        if self.requests.push(request).is_err() {
            warn!("session request list full, dropping {:?}", request);
        }
    }

    /// True (and restarts the interval) when a status poll is due.
    pub fn poll_due(&mut self) -> bool {
        let interval = u64::from(self.config.update_interval_ms);
        if self.now_ms.saturating_sub(self.last_poll_ms) >= interval {
            self.last_poll_ms = self.now_ms;
            true
        } else {
            false
        }
    }

    /// Restart the poll interval now.
    pub fn reset_poll(&mut self) {
        self.last_poll_ms = self.now_ms;
    }

    /// `*ATREADY` / `RDY`: the modem finished booting, probe right away.
    pub fn modem_ready(&mut self) {
        self.link.modem_ready = true;
        self.next_probe_ms = self.next_probe_ms.min(self.now_ms);
    }

    /// Forget everything learned from the modem (power cycle, reinitialise).
    /// The PIN flag survives so a rejected PIN is not re-entered.
    pub fn reset_link(&mut self) {
        let pin_sent = self.link.pin_sent;
        self.link = LinkStatus {
            pin_sent,
            ..LinkStatus::default()
        };
        self.requests.clear();
    }
}
