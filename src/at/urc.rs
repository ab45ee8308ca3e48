//! Unsolicited result codes (URCs) and the shared information-line parsers.
//!
//! Lines that the dispatcher does not claim for the in-flight command land
//! here.  [`UrcParser::parse`] classifies them into typed [`Urc`] values.
//! The `parse_*` helpers are also used on command responses (`AT+CREG?`,
//! `AT+CSQ`, `AT+CLCC`, ...), since the modem uses the same line format for
//! both.
//!
//! `+CMT:` is the only two-line notification: the header carries the sender
//! and the next line is the message body.

use log::debug;

use super::fields::{self, is_quoted, number, split, text};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// SIM lock state from `+CPIN:`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SimStatus {
    #[default]
    Unknown,
    Ready,
    PinRequired,
    /// Any other lock (`SIM PUK`, `PH-SIM PIN`, ...) or a missing SIM.
    Locked(String),
}

/// `+CREG` `<stat>` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegStatus {
    NotSearching,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl RegStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotSearching,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// Network registration report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Reporting mode `<n>`; absent in unsolicited `+CREG: <stat>` lines.
    pub mode: Option<u8>,
    pub status: RegStatus,
}

impl Registration {
    pub fn is_registered(&self) -> bool {
        self.status.is_registered()
    }

    /// Unsolicited registration reports are switched off (`<n> = 0`).
    pub fn reporting_disabled(&self) -> bool {
        self.mode == Some(0)
    }
}

/// `+CSQ` signal report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// 0–31, 99 = not known.
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    /// Received signal strength in dBm, `None` when unknown.
    pub fn dbm(&self) -> Option<i16> {
        (self.rssi <= 31).then(|| -113 + 2 * i16::from(self.rssi))
    }
}

/// `+CLCC` `<stat>` values.  Unknown codes map to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStat {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Disconnected,
}

impl CallStat {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Active,
            1 => Self::Held,
            2 => Self::Dialing,
            3 => Self::Alerting,
            4 => Self::Incoming,
            5 => Self::Waiting,
            _ => Self::Disconnected,
        }
    }
}

/// One `+CLCC` call-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub stat: CallStat,
    /// Empty when withheld.
    pub number: String,
}

/// `+CMGL` listing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSms {
    pub index: u16,
    pub sender: String,
}

// ---------------------------------------------------------------------------
// URC
// ---------------------------------------------------------------------------

/// A classified unsolicited notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    Ring,
    CallerId(String),
    CallStatus(CallStatus),
    CallBegin,
    CallEnd,
    NewSms { storage: String, index: u16 },
    SmsDeliver { sender: String, message: String },
    Ussd { status: u8, text: Option<String> },
    Sim(SimStatus),
    Registration(Registration),
    Signal(SignalQuality),
    ModemReady,
    /// Known boot chatter with no effect.
    Noise,
}

/// Outcome of [`UrcParser::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Event(Urc),
    /// First half of a two-line notification; feed the next line.
    NeedMore,
    Unrecognized,
}

const NOISE: [&str; 4] = ["PB DONE", "SMS DONE", "SMS Ready", "Call Ready"];

const EVENT_LINES: [&str; 7] = [
    "RING",
    "VOICE CALL: BEGIN",
    "CONNECT",
    "NO CARRIER",
    "BUSY",
    "NO ANSWER",
    "RDY",
];

const EVENT_PREFIXES: [&str; 10] = [
    "VOICE CALL: END",
    "*ATREADY:",
    "+CLIP:",
    "+CLCC:",
    "+CMTI:",
    "+CMT:",
    "+CUSD:",
    "+CPIN:",
    "+CREG:",
    "+CSQ:",
];

/// Whether `line` has the shape of a notification [`UrcParser`] handles.
pub fn is_unsolicited(line: &str) -> bool {
    EVENT_LINES.contains(&line)
        || NOISE.contains(&line)
        || EVENT_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Stateful URC classifier.
#[derive(Debug, Default)]
pub struct UrcParser {
    /// Sender of a `+CMT:` header awaiting its body line.
    pending_cmt: Option<String>,
    malformed: u32,
}

impl UrcParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines that matched a known prefix but failed to parse.
    pub fn malformed(&self) -> u32 {
        self.malformed
    }

    /// A `+CMT:` header was seen; the next line is its body, whatever it
    /// looks like.
    pub fn awaiting_body(&self) -> bool {
        self.pending_cmt.is_some()
    }

    /// Forget a half-received `+CMT:`.
    pub fn reset(&mut self) {
        self.pending_cmt = None;
    }

    pub fn parse(&mut self, line: &str) -> Parsed {
        if let Some(sender) = self.pending_cmt.take() {
            return Parsed::Event(Urc::SmsDeliver {
                sender,
                message: line.to_owned(),
            });
        }

        match self.classify(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.malformed = self.malformed.wrapping_add(1);
                debug!("dropping malformed URC {:?}: {}", line, e);
                Parsed::Unrecognized
            }
        }
    }

    fn classify(&mut self, line: &str) -> Result<Parsed> {
        let event = match line {
            "RING" => Urc::Ring,
            "VOICE CALL: BEGIN" | "CONNECT" => Urc::CallBegin,
            "NO CARRIER" | "BUSY" | "NO ANSWER" | "VOICE CALL: END" => Urc::CallEnd,
            "RDY" => Urc::ModemReady,
            l if NOISE.contains(&l) => Urc::Noise,
            l if l.starts_with("VOICE CALL: END") => Urc::CallEnd,
            l => {
                if let Some(p) = fields::payload(l, "*ATREADY:") {
                    if p == "1" {
                        Urc::ModemReady
                    } else {
                        Urc::Noise
                    }
                } else if let Some(p) = fields::payload(l, "+CLIP:") {
                    Urc::CallerId(text(&split(p), 0)?)
                } else if let Some(p) = fields::payload(l, "+CLCC:") {
                    Urc::CallStatus(parse_call_status(p)?)
                } else if let Some(p) = fields::payload(l, "+CMTI:") {
                    let f = split(p);
                    Urc::NewSms {
                        storage: text(&f, 0)?,
                        index: number(&f, 1)?,
                    }
                } else if let Some(p) = fields::payload(l, "+CMT:") {
                    self.pending_cmt = Some(text(&split(p), 0)?);
                    return Ok(Parsed::NeedMore);
                } else if let Some(p) = fields::payload(l, "+CUSD:") {
                    let f = split(p);
                    Urc::Ussd {
                        status: number(&f, 0)?,
                        text: f.get(1).map(|t| fields::unquote(t).to_owned()),
                    }
                } else if let Some(p) = fields::payload(l, "+CPIN:") {
                    Urc::Sim(parse_sim(p))
                } else if let Some(p) = fields::payload(l, "+CREG:") {
                    Urc::Registration(parse_registration(p)?)
                } else if let Some(p) = fields::payload(l, "+CSQ:") {
                    Urc::Signal(parse_signal(p)?)
                } else {
                    return Ok(Parsed::Unrecognized);
                }
            }
        };
        Ok(Parsed::Event(event))
    }
}

// ---------------------------------------------------------------------------
// Information-line parsers (payload after the prefix)
// ---------------------------------------------------------------------------

/// `+CPIN: <code>`
pub fn parse_sim(payload: &str) -> SimStatus {
    match payload.trim() {
        "READY" => SimStatus::Ready,
        "SIM PIN" => SimStatus::PinRequired,
        other => SimStatus::Locked(other.to_owned()),
    }
}

/// `+CREG: <stat>`, `+CREG: <n>,<stat>` or `+CREG: <stat>,"<lac>","<ci>"`.
pub fn parse_registration(payload: &str) -> Result<Registration> {
    let f = split(payload);
    let (mode, stat) = match f.len() {
        0 => return Err(Error::Parse("missing field")),
        1 => (None, number(&f, 0)?),
        // Unsolicited mode-2 report: stat followed by quoted location.
        _ if is_quoted(f[1]) => (None, number(&f, 0)?),
        _ => (Some(number(&f, 0)?), number(&f, 1)?),
    };
    Ok(Registration {
        mode,
        status: RegStatus::from_code(stat),
    })
}

/// `+CSQ: <rssi>,<ber>`
pub fn parse_signal(payload: &str) -> Result<SignalQuality> {
    let f = split(payload);
    Ok(SignalQuality {
        rssi: number(&f, 0)?,
        ber: number(&f, 1)?,
    })
}

/// `+CLCC: <idx>,<dir>,<stat>,<mode>,<mpty>[,<number>,<type>]`
pub fn parse_call_status(payload: &str) -> Result<CallStatus> {
    let f = split(payload);
    Ok(CallStatus {
        stat: CallStat::from_code(number(&f, 2)?),
        number: text(&f, 5).unwrap_or_default(),
    })
}

/// `+CMGL: <index>,<stat>,<oa>,...`
pub fn parse_listing_header(payload: &str) -> Result<StoredSms> {
    let f = split(payload);
    Ok(StoredSms {
        index: number(&f, 0)?,
        sender: text(&f, 2)?,
    })
}
