//! Mock hardware for integration tests.
//!
//! `MockModem` is a scripted SIMCom-style modem behind the `Transport`
//! port: every command line written to it is recorded and answered the way
//! a healthy A76xx would, with knobs to change the SIM state, network state
//! and error paths.  `MockPin` records power key levels, `MockClock` is a
//! hand-advanced millisecond clock.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;

use cellmodem::app::events::ModemEvent;
use cellmodem::app::ports::{Clock, EventSink};
use cellmodem::app::service::ModemService;
use cellmodem::at::Transport;
use cellmodem::at::fields::to_ucs2_hex;
use cellmodem::config::ModemConfig;
use cellmodem::fsm::ModemState;
use embedded_hal::digital::{ErrorType, OutputPin};

const CTRL_Z: u8 = 0x1A;

// ── What the service wrote ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    /// A command line, terminator stripped.
    Line(String),
    /// Text sent after the `>` prompt, Ctrl-Z stripped.
    Payload(String),
}

// ── Simulated modem ───────────────────────────────────────────

pub struct ModemSim {
    /// Echo command lines back (on until `ATE0`).
    pub echo: bool,
    /// Swallow every command without answering.
    pub silent: bool,
    /// Fail every write.
    pub fail_writes: bool,
    /// `+CPIN:` answer (`READY`, `SIM PIN`, ...).
    pub sim: String,
    /// PIN the SIM accepts.
    pub pin: String,
    /// `+CREG` `<n>` and `<stat>`.
    pub creg_mode: u8,
    pub creg_stat: u8,
    pub csq: (u8, u8),
    pub model: String,
    /// `AT+CSCS="UCS2"` is in force.
    pub ucs2: bool,
    /// `AT+CSCS="UCS2"` is accepted.
    pub ucs2_supported: bool,
    /// Answer to the SMS body instead of `+CMGS: <mr>` / `OK`.
    pub cmgs_reply: Option<String>,
    /// Stored unread messages: `(index, sender, body)`.
    pub inbox: Vec<(u16, String, String)>,
    /// `+CLCC:` payloads returned by `AT+CLCC`.
    pub calls: Vec<String>,
    /// Full reply text for specific command lines.
    pub overrides: HashMap<String, String>,
    pub sent: Vec<Sent>,
    rx: VecDeque<u8>,
    pending: Vec<u8>,
}

impl Default for ModemSim {
    fn default() -> Self {
        Self {
            echo: true,
            silent: false,
            fail_writes: false,
            sim: "READY".into(),
            pin: "1234".into(),
            creg_mode: 0,
            creg_stat: 1,
            csq: (20, 99),
            model: "A7670E-LASE".into(),
            ucs2: false,
            ucs2_supported: true,
            cmgs_reply: None,
            inbox: Vec::new(),
            calls: Vec::new(),
            overrides: HashMap::new(),
            sent: Vec::new(),
            rx: VecDeque::new(),
            pending: Vec::new(),
        }
    }
}

fn framed(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("\r\n{l}\r\n")).collect()
}

impl ModemSim {
    fn on_byte(&mut self, byte: u8) {
        if byte == CTRL_Z {
            let body = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.sent.push(Sent::Payload(body));
            if !self.silent {
                let reply = self
                    .cmgs_reply
                    .clone()
                    .unwrap_or_else(|| framed(&["+CMGS: 7", "OK"]));
                self.queue(&reply);
            }
            return;
        }
        self.pending.push(byte);
        if self.pending.ends_with(b"\r\n") {
            let line = String::from_utf8_lossy(&self.pending[..self.pending.len() - 2]).into_owned();
            self.pending.clear();
            self.sent.push(Sent::Line(line.clone()));
            if self.silent {
                return;
            }
            if self.echo {
                self.queue(&format!("{line}\r\n"));
            }
            let reply = self.answer(&line);
            self.queue(&reply);
        }
    }

    fn answer(&mut self, line: &str) -> String {
        if let Some(reply) = self.overrides.get(line) {
            return reply.clone();
        }
        let ok = framed(&["OK"]);
        match line {
            "ATE0" => {
                self.echo = false;
                ok
            }
            "AT+CGMM" => framed(&[self.model.as_str(), "OK"]),
            "AT+CPIN?" => framed(&[format!("+CPIN: {}", self.sim).as_str(), "OK"]),
            "AT+CREG?" => framed(&[format!("+CREG: {},{}", self.creg_mode, self.creg_stat).as_str(), "OK"]),
            "AT+CREG=1" => {
                self.creg_mode = 1;
                ok
            }
            "AT+CSQ" => framed(&[format!("+CSQ: {},{}", self.csq.0, self.csq.1).as_str(), "OK"]),
            "AT+CLCC" => {
                let mut lines: Vec<String> = self.calls.iter().map(|c| format!("+CLCC: {c}")).collect();
                lines.push("OK".into());
                let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                framed(&refs)
            }
            "AT+CMGL=\"REC UNREAD\"" => {
                let text = |s: &str| if self.ucs2 { to_ucs2_hex(s) } else { s.to_owned() };
                let mut out = String::new();
                for (index, sender, body) in &self.inbox {
                    let length = body.encode_utf16().count();
                    out.push_str(&format!(
                        "\r\n+CMGL: {index},\"REC UNREAD\",\"{}\",\"\",\"24/10/18,10:00:00+08\",145,{length}\r\n",
                        text(sender)
                    ));
                    if !body.is_empty() {
                        out.push_str(&format!("{}\r\n", text(body)));
                    }
                }
                out.push_str(&ok);
                out
            }
            "AT+CSCS=\"GSM\"" => {
                self.ucs2 = false;
                ok
            }
            "AT+CSCS=\"UCS2\"" if self.ucs2_supported => {
                self.ucs2 = true;
                ok
            }
            "AT" | "AT+CMEE=2" | "AT+CLIP=1" | "AT+CMGF=1" | "AT+CSDH=1" | "ATA" | "AT+CHUP" => ok,
            l if l.starts_with("AT+CPIN=") => {
                if l["AT+CPIN=".len()..] == self.pin {
                    self.sim = "READY".into();
                    format!("{ok}{}", framed(&["+CPIN: READY", "SMS DONE", "PB DONE"]))
                } else {
                    framed(&["+CME ERROR: incorrect password"])
                }
            }
            l if l.starts_with("AT+CMGS=") => "\r\n> ".into(),
            l if l.starts_with("AT+CSMP=") => ok,
            l if l.starts_with("AT+CMGD=") => {
                if let Ok(index) = l["AT+CMGD=".len()..].parse::<u16>() {
                    self.inbox.retain(|(i, _, _)| *i != index);
                }
                ok
            }
            l if l.starts_with("ATD") || l.starts_with("AT+CUSD=") => ok,
            _ => framed(&["ERROR"]),
        }
    }

    fn queue(&mut self, text: &str) {
        self.rx.extend(text.bytes());
    }
}

/// Shared handle: one copy goes into the service, the test keeps another.
#[derive(Clone, Default)]
pub struct MockModem(Rc<RefCell<ModemSim>>);

#[allow(dead_code)]
impl MockModem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, f: impl FnOnce(&mut ModemSim)) {
        f(&mut self.0.borrow_mut());
    }

    /// Queue an unsolicited line.
    pub fn urc(&self, line: &str) {
        self.0.borrow_mut().queue(&framed(&[line]));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.0.borrow().sent.clone()
    }

    /// Command lines only.
    pub fn lines(&self) -> Vec<String> {
        self.0
            .borrow()
            .sent
            .iter()
            .filter_map(|s| match s {
                Sent::Line(l) => Some(l.clone()),
                Sent::Payload(_) => None,
            })
            .collect()
    }

    pub fn count(&self, line: &str) -> usize {
        self.lines().iter().filter(|l| l.as_str() == line).count()
    }

    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }
}

impl Transport for MockModem {
    type Error = &'static str;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut sim = self.0.borrow_mut();
        let n = sim.rx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(sim.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut sim = self.0.borrow_mut();
        if sim.fail_writes {
            return Err("uart write failed");
        }
        for &b in data {
            sim.on_byte(b);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn available(&self) -> bool {
        !self.0.borrow().rx.is_empty()
    }
}

// ── MockPin ───────────────────────────────────────────────────

/// Power key; records every level written.
#[derive(Clone, Default)]
pub struct MockPin(Rc<RefCell<Vec<bool>>>);

#[allow(dead_code)]
impl MockPin {
    pub fn levels(&self) -> Vec<bool> {
        self.0.borrow().clone()
    }

    pub fn is_high(&self) -> bool {
        self.0.borrow().last().copied().unwrap_or(false)
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(true);
        Ok(())
    }
}

// ── MockClock ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ModemEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ModemEvent) {
        self.events.push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────

pub type Service = ModemService<MockModem, MockPin, MockClock>;

/// Service wired to the mocks, with helpers to drive the control loop.
pub struct Harness {
    pub svc: Service,
    pub modem: MockModem,
    pub pin: MockPin,
    pub clock: MockClock,
    pub sink: RecordingSink,
}

/// Defaults with the boot grace period removed.
pub fn test_config() -> ModemConfig {
    ModemConfig {
        boot_delay_ms: 0,
        ..ModemConfig::default()
    }
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: ModemConfig) -> Self {
        let modem = MockModem::new();
        let pin = MockPin::default();
        let clock = MockClock::default();
        let svc = ModemService::new(config, modem.clone(), Some(pin.clone()), clock.clone());
        Self {
            svc,
            modem,
            pin,
            clock,
            sink: RecordingSink::default(),
        }
    }

    pub fn tick(&mut self) {
        self.svc.tick(&mut self.sink);
    }

    /// Advance the clock, then tick.
    pub fn step(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.tick();
    }

    /// Tick without moving time until nothing is queued or in flight.
    pub fn settle(&mut self) {
        for _ in 0..64 {
            self.tick();
            if self.svc.pending_commands() == 0 {
                return;
            }
        }
        panic!("commands still pending: {:?}", self.modem.sent());
    }

    /// Tick until `state` is reached.
    pub fn run_until(&mut self, state: ModemState) {
        for _ in 0..64 {
            if self.svc.state() == state {
                return;
            }
            self.tick();
        }
        panic!("stuck in {:?}, sent {:?}", self.svc.state(), self.modem.sent());
    }

    /// Start and drive a healthy modem to `Registered`, then drain the
    /// follow-up inbox read.
    pub fn bring_up(&mut self) {
        self.svc.start();
        self.run_until(ModemState::Registered);
        self.settle();
    }

    pub fn take_events(&mut self) -> Vec<ModemEvent> {
        std::mem::take(&mut self.sink.events)
    }
}
