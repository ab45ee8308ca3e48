//! Modem service — the hexagonal core.
//!
//! [`ModemService`] owns the serial transport, the optional power pin, the
//! command dispatcher, the URC parser and the session FSM.  It is driven
//! by [`tick`](ModemService::tick) from a single control loop and never
//! blocks.
//!
//! ```text
//!  Transport ──▶ ┌──────────────────────────────────┐ ──▶ Subscribers
//!                │            ModemService          │ ──▶ EventSink
//!  ModemCommand ▶│ LineReader · Dispatcher · URC    │
//!                │ Session FSM · call/SMS/USSD flows│ ──▶ power pin
//!                └──────────────────────────────────┘
//! ```
//!
//! Per tick: read and route modem output, expire timeouts, step the FSM,
//! queue what the FSM asked for, poll the call list, start the next
//! command, then deliver the accumulated events.  Events raised outside a
//! tick (an action rejected in [`handle_command`](ModemService::handle_command))
//! are delivered on the next tick.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, error, info, trace, warn};

use crate::at::channels::ActionQueue;
use crate::at::command::{Command, ResponseMatcher};
use crate::at::dispatcher::{Completion, Dispatcher, LineRoute};
use crate::at::fields::{self, Charset};
use crate::at::line::{Line, LineReader};
use crate::at::transport::{Transport, transport_error};
use crate::at::urc::{
    self, CallStat, CallStatus, Parsed, Registration, SignalQuality, Urc, UrcParser,
};
use crate::config::ModemConfig;
use crate::error::Error;
use crate::fsm::context::{ModemModel, SessionContext, SessionRequest};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, ModemState};

use super::commands::{AtReply, ModemCommand};
use super::events::{CallState, ModemEvent};
use super::ports::{Clock, EventSink, NoPowerPin};
use super::subscribers::Subscribers;

/// Network actions held back until the session is registered.
pub const DEFERRED_DEPTH: usize = 8;

const READ_CHUNK: usize = 64;

// ───────────────────────────────────────────────────────────────
// Command tags
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmsStep {
    TextMode,
    Charset,
    Coding,
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboxStep {
    TextMode,
    ShowHeaders,
    Charset,
    List,
    Delete,
}

/// Travels with every command so its completion can be routed.
enum Tag {
    Session(SessionRequest),
    Sms {
        seq: u32,
        step: SmsStep,
        recipient: String,
        message: String,
    },
    Inbox(InboxStep),
    DialCharset,
    Dial,
    Answer,
    HangUp,
    UssdCharset,
    Ussd,
    CallCheck,
    Raw(Option<AtReply>),
}

// ───────────────────────────────────────────────────────────────
// ModemService
// ───────────────────────────────────────────────────────────────

/// The modem session manager.
pub struct ModemService<T: Transport, P: OutputPin, C: Clock> {
    transport: T,
    power: Option<P>,
    clock: C,
    dispatcher: Dispatcher<Tag>,
    reader: LineReader,
    urc: UrcParser,
    fsm: Fsm,
    ctx: SessionContext,
    subscribers: Subscribers,
    outbox: Vec<ModemEvent>,
    /// State reported by the last `StateChanged`.
    last_state: ModemState,
    call: CallState,
    incoming_announced: bool,
    deferred: heapless::Deque<ModemCommand, DEFERRED_DEPTH>,
    next_sms_seq: u32,
    /// Sequence whose failure was already reported.
    failed_sms_seq: Option<u32>,
    /// Last `AT+CLCC` poll; `None` polls on the next tick.
    last_call_check_ms: Option<u64>,
    signal: Option<SignalQuality>,
    registered: bool,
    /// Last `AT+CSCS` the modem accepted.
    charset: Charset,
    /// Coding scheme of the last accepted `AT+CSMP`; `None` after a failed one.
    sms_coding: Option<Charset>,
    /// Power key pulse ends at this time.
    power_release_ms: Option<u64>,
    debug: bool,
}

impl<T: Transport, C: Clock> ModemService<T, NoPowerPin, C> {
    /// Service for boards without a power key line.
    pub fn without_power_pin(config: ModemConfig, transport: T, clock: C) -> Self {
        Self::new(config, transport, None, clock)
    }
}

impl<T: Transport, P: OutputPin, C: Clock> ModemService<T, P, C> {
    /// Construct the service.  Does **not** start the FSM; call
    /// [`start`](Self::start) next.
    pub fn new(config: ModemConfig, transport: T, power: Option<P>, clock: C) -> Self {
        let debug = config.debug;
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_verbose(debug);
        Self {
            transport,
            power,
            clock,
            dispatcher,
            reader: LineReader::new(),
            urc: UrcParser::new(),
            fsm: Fsm::new(build_state_table(), ModemState::Uninitialized),
            ctx: SessionContext::new(config),
            subscribers: Subscribers::new(),
            outbox: Vec::new(),
            last_state: ModemState::Uninitialized,
            call: CallState::Idle,
            incoming_announced: false,
            deferred: heapless::Deque::new(),
            next_sms_seq: 0,
            failed_sms_seq: None,
            last_call_check_ms: None,
            signal: None,
            registered: false,
            charset: Charset::Gsm,
            sms_coding: Some(Charset::Gsm),
            power_release_ms: None,
            debug,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Register callbacks here before [`start`](Self::start).
    pub fn subscribers_mut(&mut self) -> &mut Subscribers {
        &mut self.subscribers
    }

    /// Start the session FSM.
    pub fn start(&mut self) {
        self.ctx.now_ms = self.clock.now_ms();
        self.log_config();
        self.fsm.start(&mut self.ctx);
        self.last_state = self.fsm.current_state();
    }

    /// Log the configuration and what is known about the modem.
    pub fn log_config(&self) {
        let c = &self.ctx.config;
        info!("Modem:");
        info!("  model: {}", self.ctx.link.model);
        info!("  baud rate: {}", c.baud_rate);
        info!("  PIN configured: {}", c.pin_code.is_some());
        info!("  power pin: {}", self.power.is_some());
        info!("  update interval: {} ms", c.update_interval_ms);
        info!(
            "  command timeout: {} ms x {} attempts",
            c.command_timeout_ms,
            u32::from(c.command_retries) + 1
        );
        info!("  USSD hex: {}", c.ussd_hex);
    }

    /// Drop all modem knowledge and start over from `Uninitialized`.
    /// Pending commands complete with [`Error::Cancelled`].  Also the way
    /// out of `Error`.
    pub fn reinitialize(&mut self) {
        info!("reinitialising modem session");
        self.ctx.now_ms = self.clock.now_ms();
        self.abort_commands(&Error::Cancelled);
        self.reader.reset();
        self.urc.reset();
        self.ctx.reset_link();
        self.ctx.link.pin_sent = false;
        self.set_call(CallState::Idle);
        self.update_registered(false);
        self.fsm.force_transition(ModemState::Uninitialized, &mut self.ctx);
        // The modem is normally up already; a silent one is power cycled.
        self.ctx.next_probe_ms = self.ctx.now_ms;
    }

    /// Cancel everything and release the power key.
    pub fn shutdown(&mut self, sink: &mut impl EventSink) {
        info!("modem service shutting down");
        self.abort_commands(&Error::Cancelled);
        self.flush_deferred(&Error::Cancelled);
        if let Some(pin) = self.power.as_mut() {
            if let Err(e) = pin.set_low() {
                warn!("power pin: {:?}", e);
            }
        }
        self.power_release_ms = None;
        self.deliver(sink);
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle.
    pub fn tick(&mut self, sink: &mut impl EventSink) {
        let now = self.clock.now_ms();
        self.ctx.now_ms = now;

        self.release_power_key(now);

        // 1. Modem output
        self.read_transport(now);

        // 2. Deadlines
        if self.fsm.current_state() != ModemState::Error {
            match self.dispatcher.expire(&mut self.transport, now) {
                Ok(Some(done)) => self.on_completion(done),
                Ok(None) => {}
                Err(e) => self.fail_transport(e),
            }
        }

        // 3. Session state machine
        self.fsm.tick(&mut self.ctx);
        self.sync_state();

        // 4. Session requests and call polling
        self.queue_session_requests();
        self.poll_calls(now);

        // 5. Next command
        if self.fsm.current_state() != ModemState::Error {
            if let Err(e) = self.dispatcher.start_next(&mut self.transport, now) {
                self.fail_transport(e);
            }
        }
        self.sync_state();

        // 6. Events
        self.deliver(sink);
    }

    /// Drain actions posted by other tasks.
    pub fn drain_actions(&mut self, queue: &ActionQueue) {
        while let Ok(command) = queue.try_receive() {
            self.handle_command(command);
        }
    }

    // ── Action handling ───────────────────────────────────────

    /// Process an action.  Commands go out on the following ticks.
    pub fn handle_command(&mut self, command: ModemCommand) {
        debug!("action {:?}", command);
        let state = self.fsm.current_state();

        if state == ModemState::Error {
            warn!("{} rejected: modem in error state", command.name());
            self.reject(command, Error::Unavailable);
            return;
        }

        let empty_recipient = matches!(
            &command,
            ModemCommand::SendSms { recipient, .. } if recipient.trim().is_empty()
        );
        if empty_recipient {
            self.reject(command, Error::Parse("empty recipient"));
            return;
        }

        if command.needs_network() && state != ModemState::Registered {
            debug!("{} deferred until registered", command.name());
            if let Err(command) = self.deferred.push_back(command) {
                warn!("deferred action queue full");
                self.reject(command, Error::QueueFull);
            }
            return;
        }

        self.execute(command);
    }

    fn execute(&mut self, command: ModemCommand) {
        let timeout = self.command_timeout();
        let retries = self.ctx.config.command_retries;

        match command {
            ModemCommand::SendSms { recipient, message } => {
                let charset = Charset::for_text(&message);
                let mut steps = vec![
                    (Command::new("AT+CMGF=1", timeout, retries), SmsStep::TextMode),
                    (Command::new(charset.select_command(), timeout, retries), SmsStep::Charset),
                ];
                if self.sms_coding != Some(charset) {
                    let csmp = format!("AT+CSMP=17,167,0,{}", charset.coding_scheme());
                    steps.push((Command::new(csmp, timeout, retries), SmsStep::Coding));
                }
                let submit = Command::new(
                    format!("AT+CMGS=\"{}\"", charset.encode(&recipient)),
                    timeout,
                    retries,
                )
                .with_matcher(ResponseMatcher::Prefix("+CMGS:"))
                .with_payload(charset.encode(&message));
                let submit = Command {
                    timeout: Duration::from_millis(u64::from(self.ctx.config.sms_timeout_ms)),
                    ..submit
                };
                steps.push((submit, SmsStep::Submit));

                if self.dispatcher.capacity_left() < steps.len() {
                    self.reject(ModemCommand::SendSms { recipient, message }, Error::QueueFull);
                    return;
                }
                let seq = self.next_sms_seq;
                self.next_sms_seq = self.next_sms_seq.wrapping_add(1);
                info!("sending SMS to {} ({:?})", recipient, charset);

                for (cmd, step) in steps {
                    let tag = Tag::Sms {
                        seq,
                        step,
                        recipient: recipient.clone(),
                        message: message.clone(),
                    };
                    self.enqueue(cmd, tag);
                }
            }
            ModemCommand::Dial { recipient } => {
                if self.call != CallState::Idle {
                    warn!("dial {} rejected: call already in progress", recipient);
                    return;
                }
                info!("dialing {}", recipient);
                self.enqueue(Command::new("AT+CSCS=\"GSM\"", timeout, retries), Tag::DialCharset);
                self.enqueue(Command::new(format!("ATD{recipient};"), timeout, 0), Tag::Dial);
            }
            ModemCommand::Connect => {
                if self.call != CallState::Ringing {
                    warn!("connect ignored: no ringing call");
                    return;
                }
                self.enqueue(Command::new("ATA", timeout, 0), Tag::Answer);
            }
            ModemCommand::Disconnect => {
                if self.call == CallState::Idle {
                    warn!("disconnect ignored: no call");
                    return;
                }
                self.enqueue(Command::new("AT+CHUP", timeout, retries), Tag::HangUp);
            }
            ModemCommand::SendUssd { code } => {
                let encoded = if self.ctx.config.ussd_hex {
                    fields::to_hex(&code)
                } else {
                    code.clone()
                };
                info!("sending USSD {}", code);
                self.enqueue(Command::new("AT+CSCS=\"GSM\"", timeout, retries), Tag::UssdCharset);
                self.enqueue(
                    Command::new(format!("AT+CUSD=1,\"{encoded}\",15"), timeout, 0),
                    Tag::Ussd,
                );
            }
            ModemCommand::SendAt { command, reply } => {
                let cmd = Command::new(command, timeout, 0).with_matcher(ResponseMatcher::Raw);
                self.enqueue(cmd, Tag::Raw(reply));
            }
            ModemCommand::DebugOn => self.set_debug(true),
            ModemCommand::DebugOff => self.set_debug(false),
        }
    }

    /// Fail an action that never reached the dispatcher.
    fn reject(&mut self, command: ModemCommand, error: Error) {
        match command {
            ModemCommand::SendSms { recipient, .. } => {
                warn!("SMS to {} failed: {}", recipient, error);
                self.outbox.push(ModemEvent::SmsSendFailed {
                    error: error.callback_text(),
                    recipient,
                });
            }
            ModemCommand::SendAt {
                reply: Some(reply), ..
            } => reply(Err(error)),
            ModemCommand::DebugOn => self.set_debug(true),
            ModemCommand::DebugOff => self.set_debug(false),
            other => warn!("{} dropped: {}", other.name(), error),
        }
    }

    fn set_debug(&mut self, on: bool) {
        info!("AT traffic logging {}", if on { "on" } else { "off" });
        self.debug = on;
        self.dispatcher.set_verbose(on);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> ModemState {
        self.fsm.current_state()
    }

    pub fn call_state(&self) -> CallState {
        self.call
    }

    /// The "registered" binary sensor.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The "rssi" sensor.
    pub fn signal(&self) -> Option<SignalQuality> {
        self.signal
    }

    pub fn model(&self) -> &ModemModel {
        &self.ctx.link.model
    }

    pub fn config(&self) -> &ModemConfig {
        &self.ctx.config
    }

    /// Queued plus in-flight commands.
    pub fn pending_commands(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn deferred_actions(&self) -> usize {
        self.deferred.len()
    }

    /// Unsolicited lines dropped because they failed to parse.
    pub fn dropped_lines(&self) -> u32 {
        self.urc.malformed()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    // ── Internal: transport ───────────────────────────────────

    fn read_transport(&mut self, now: u64) {
        let mut buf = [0u8; READ_CHUNK];
        while self.fsm.current_state() != ModemState::Error {
            let n = match self.transport.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n.min(buf.len()),
                Err(e) => {
                    self.fail_transport(transport_error(e));
                    break;
                }
            };
            for &byte in &buf[..n] {
                self.reader.expect_prompt(self.dispatcher.awaiting_prompt());
                if let Some(line) = self.reader.push(byte) {
                    self.route_line(line, now);
                }
            }
        }
    }

    fn route_line(&mut self, line: Line, now: u64) {
        match &line {
            Line::Text(text) if self.debug => info!("<< {}", text),
            Line::Text(text) => debug!("<< {}", text),
            Line::Prompt => trace!("<< >"),
        }
        // A `+CMT:` body belongs to the notification, whatever it reads.
        if let Line::Text(text) = &line {
            if self.urc.awaiting_body() {
                self.on_unsolicited(text);
                return;
            }
        }
        match self.dispatcher.on_line(&line, &mut self.transport, now) {
            Ok(LineRoute::Consumed) => {}
            Ok(LineRoute::Completed(done)) => self.on_completion(done),
            Ok(LineRoute::Unsolicited) => {
                if let Line::Text(text) = line {
                    self.on_unsolicited(&text);
                }
            }
            Err(e) => self.fail_transport(e),
        }
    }

    fn fail_transport(&mut self, e: Error) {
        if self.ctx.link.transport_failed {
            return;
        }
        error!("modem transport failed: {}", e);
        self.ctx.link.transport_failed = true;
        self.abort_commands(&e);
        self.fsm.force_transition(ModemState::Error, &mut self.ctx);
        self.flush_deferred(&Error::Unavailable);
    }

    fn abort_commands(&mut self, e: &Error) {
        for done in self.dispatcher.abort_all(e) {
            self.on_completion(done);
        }
    }

    fn flush_deferred(&mut self, e: &Error) {
        while let Some(command) = self.deferred.pop_front() {
            self.reject(command, e.clone());
        }
    }

    fn enqueue(&mut self, command: Command, tag: Tag) {
        let text = command.text.clone();
        if let Err(tag) = self.dispatcher.submit(command, tag) {
            warn!("command queue full, dropping {}", text);
            self.on_completion(Completion {
                tag,
                command: text,
                result: Err(Error::QueueFull),
            });
        }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.ctx.config.command_timeout_ms))
    }

    // ── Internal: session ─────────────────────────────────────

    fn sync_state(&mut self) {
        let state = self.fsm.current_state();
        if state == self.last_state {
            return;
        }
        let from = self.last_state;
        self.last_state = state;
        self.outbox.push(ModemEvent::StateChanged { from, to: state });
        if state == ModemState::Registered {
            self.on_registered();
        }
    }

    fn on_registered(&mut self) {
        let held = self.deferred.len();
        if held > 0 {
            info!("releasing {} deferred action(s)", held);
        }
        while let Some(command) = self.deferred.pop_front() {
            self.execute(command);
        }
        self.schedule_inbox();
    }

    fn queue_session_requests(&mut self) {
        let requests = core::mem::take(&mut self.ctx.requests);
        for request in requests {
            let outstanding = self
                .dispatcher
                .tags()
                .any(|t| matches!(t, Tag::Session(r) if *r == request));
            if outstanding {
                trace!("{:?} still outstanding, skipped", request);
                continue;
            }
            let command = request.command(&self.ctx.config);
            self.enqueue(command, Tag::Session(request));
        }
    }

    fn on_session_reply(&mut self, request: SessionRequest, result: Result<crate::at::Response, Error>) {
        match (request, result) {
            (SessionRequest::Probe, Ok(_)) | (SessionRequest::Probe, Err(Error::Modem(_))) => {
                if !self.ctx.link.probe_ok {
                    info!("modem answered");
                }
                self.ctx.link.probe_ok = true;
                self.ctx.link.probe_failures = 0;
            }
            (SessionRequest::Probe, Err(Error::Timeout)) => {
                self.ctx.link.probe_failures += 1;
                self.power_cycle();
            }
            (SessionRequest::IdentifyModel, Ok(resp)) => {
                if let Some(id) = resp.lines.iter().find(|l| !l.trim().is_empty()) {
                    self.ctx.link.model = ModemModel::detect(id);
                    info!("modem model: {}", self.ctx.link.model);
                }
            }
            (SessionRequest::QuerySim, Ok(resp)) => {
                if let Some(p) = resp.lines_with("+CPIN:").find_map(|l| fields::payload(l, "+CPIN:")) {
                    self.ctx.link.sim = urc::parse_sim(p);
                }
            }
            (SessionRequest::EnterPin, Ok(_)) => {
                info!("SIM PIN accepted");
                self.ctx.link.sim = urc::SimStatus::Unknown;
                self.ctx.request(SessionRequest::QuerySim);
            }
            (SessionRequest::EnterPin, Err(e)) => error!("SIM PIN rejected: {}", e),
            (SessionRequest::QueryRegistration, Ok(resp)) => {
                let parsed = resp
                    .lines_with("+CREG:")
                    .filter_map(|l| fields::payload(l, "+CREG:"))
                    .map(urc::parse_registration)
                    .next();
                match parsed {
                    Some(Ok(reg)) => self.apply_registration(reg),
                    Some(Err(e)) => warn!("bad +CREG answer: {}", e),
                    None => {}
                }
            }
            (SessionRequest::QuerySignal, Ok(resp)) => {
                let parsed = resp
                    .lines_with("+CSQ:")
                    .filter_map(|l| fields::payload(l, "+CSQ:"))
                    .map(urc::parse_signal)
                    .next();
                match parsed {
                    Some(Ok(q)) => self.apply_signal(q),
                    Some(Err(e)) => warn!("bad +CSQ answer: {}", e),
                    None => {}
                }
            }
            (_, Ok(_)) => {}
            (_, Err(Error::Transport(_) | Error::Cancelled)) => {}
            (request, Err(e)) => warn!("{:?} failed: {}", request, e),
        }
    }

    /// Unanswered probe: pulse the power key if there is one.
    fn power_cycle(&mut self) {
        let now = self.ctx.now_ms;
        let cfg = &self.ctx.config;
        match self.power.as_mut() {
            Some(pin) => {
                warn!(
                    "modem not responding (attempt {}), power cycling",
                    self.ctx.link.probe_failures
                );
                if let Err(e) = pin.set_high() {
                    warn!("power pin: {:?}", e);
                }
                let pulse = u64::from(cfg.power_pulse_ms);
                self.power_release_ms = Some(now + pulse);
                self.ctx.next_probe_ms = now + pulse + u64::from(cfg.modem_boot_timeout_ms);
                self.ctx.link.modem_ready = false;
                self.reader.reset();
                self.charset = Charset::Gsm;
                self.sms_coding = Some(Charset::Gsm);
            }
            None => {
                error!(
                    "modem not responding (attempt {}), no power pin to recover",
                    self.ctx.link.probe_failures
                );
                self.ctx.next_probe_ms = now + u64::from(cfg.command_timeout_ms);
            }
        }
    }

    fn release_power_key(&mut self, now: u64) {
        if self.power_release_ms.is_some_and(|t| now >= t) {
            self.power_release_ms = None;
            if let Some(pin) = self.power.as_mut() {
                if let Err(e) = pin.set_low() {
                    warn!("power pin: {:?}", e);
                }
            }
            debug!("power key released");
        }
    }

    fn apply_registration(&mut self, reg: Registration) {
        let mode = reg.mode.or(self.ctx.link.registration.and_then(|r| r.mode));
        let merged = Registration { mode, ..reg };
        self.ctx.link.registration = Some(merged);
        self.update_registered(merged.is_registered());
    }

    fn update_registered(&mut self, registered: bool) {
        if registered != self.registered {
            self.registered = registered;
            self.outbox.push(ModemEvent::RegistrationChanged(registered));
        }
    }

    fn apply_signal(&mut self, q: SignalQuality) {
        debug!("RSSI: {} ({:?} dBm)", q.rssi, q.dbm());
        self.signal = Some(q);
        self.outbox.push(ModemEvent::SignalQuality(q));
    }

    // ── Internal: completions ─────────────────────────────────

    fn on_completion(&mut self, done: Completion<Tag>) {
        let Completion {
            tag,
            command,
            result,
        } = done;
        trace!("{} completed: {:?}", command, result.as_ref().map(|_| ()));
        if result.is_ok() {
            if let Some(charset) = Charset::from_command(&command) {
                self.charset = charset;
            }
        }

        match tag {
            Tag::Session(request) => self.on_session_reply(request, result),
            Tag::Sms {
                seq,
                step,
                recipient,
                message,
            } => match result {
                Ok(_) if step == SmsStep::Submit => {
                    info!("SMS to {} sent", recipient);
                    self.outbox.push(ModemEvent::SmsSent { message, recipient });
                }
                Ok(_) if step == SmsStep::Coding => {
                    self.sms_coding = Some(Charset::for_text(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    if step == SmsStep::Coding {
                        self.sms_coding = None;
                    }
                    if self.failed_sms_seq == Some(seq) {
                        return;
                    }
                    self.failed_sms_seq = Some(seq);
                    self.dispatcher.discard_where(
                        |t| matches!(t, Tag::Sms { seq: s, .. } if *s == seq),
                    );
                    warn!("SMS to {} failed at {:?}: {}", recipient, step, e);
                    self.outbox.push(ModemEvent::SmsSendFailed {
                        error: e.callback_text(),
                        recipient,
                    });
                }
            },
            Tag::Inbox(step) => self.on_inbox_reply(step, result),
            Tag::DialCharset | Tag::UssdCharset => {
                if let Err(e) = result {
                    let dial = matches!(tag, Tag::DialCharset);
                    warn!("{} aborted: {}", if dial { "dial" } else { "USSD" }, e);
                    self.dispatcher.discard_where(|t| {
                        if dial {
                            matches!(t, Tag::Dial)
                        } else {
                            matches!(t, Tag::Ussd)
                        }
                    });
                }
            }
            Tag::Dial => match result {
                Ok(_) => {
                    self.set_call(CallState::Ringing);
                    // Poll right away to pick up the dialing state.
                    self.last_call_check_ms = None;
                }
                Err(e) => warn!("dial failed: {}", e),
            },
            Tag::Answer | Tag::HangUp | Tag::Ussd => {
                if let Err(e) = result {
                    warn!("{} failed: {}", command, e);
                }
            }
            Tag::CallCheck => match result {
                Ok(resp) => {
                    let calls: Vec<CallStatus> = resp
                        .lines_with("+CLCC:")
                        .filter_map(|l| fields::payload(l, "+CLCC:"))
                        .filter_map(|p| urc::parse_call_status(p).ok())
                        .collect();
                    match calls.into_iter().next() {
                        Some(status) => self.apply_call_status(status),
                        None => self.set_call(CallState::Idle),
                    }
                }
                Err(e) => debug!("call list poll failed: {}", e),
            },
            Tag::Raw(reply) => {
                if let Some(reply) = reply {
                    reply(result.map(|r| r.raw()));
                }
            }
        }
    }

    // ── Internal: calls ───────────────────────────────────────

    fn poll_calls(&mut self, now: u64) {
        if self.call == CallState::Idle || self.fsm.current_state() == ModemState::Error {
            return;
        }
        let interval = u64::from(self.ctx.config.call_check_interval_ms);
        if self
            .last_call_check_ms
            .is_some_and(|last| now.saturating_sub(last) < interval)
        {
            return;
        }
        if self.dispatcher.tags().any(|t| matches!(t, Tag::CallCheck)) {
            return;
        }
        self.last_call_check_ms = Some(now);
        let cmd = Command::new("AT+CLCC", self.command_timeout(), 0)
            .with_matcher(ResponseMatcher::Prefix("+CLCC:"));
        self.enqueue(cmd, Tag::CallCheck);
    }

    fn apply_call_status(&mut self, status: CallStatus) {
        let number = self.charset.decode(&status.number);
        match status.stat {
            CallStat::Active | CallStat::Held => self.set_call(CallState::Connected),
            CallStat::Dialing | CallStat::Alerting => self.set_call(CallState::Ringing),
            CallStat::Incoming | CallStat::Waiting => {
                self.set_call(CallState::Ringing);
                self.announce_incoming(number);
            }
            CallStat::Disconnected => self.set_call(CallState::Idle),
        }
    }

    fn announce_incoming(&mut self, caller_id: String) {
        if self.incoming_announced {
            return;
        }
        self.incoming_announced = true;
        info!("incoming call from {}", caller_id);
        self.outbox.push(ModemEvent::IncomingCall { caller_id });
    }

    fn set_call(&mut self, next: CallState) {
        if next == self.call {
            return;
        }
        debug!("call state {:?} -> {:?}", self.call, next);
        let was_idle = self.call == CallState::Idle;
        self.call = next;
        match next {
            CallState::Connected => self.outbox.push(ModemEvent::CallConnected),
            CallState::Idle => {
                self.incoming_announced = false;
                self.outbox.push(ModemEvent::CallDisconnected);
            }
            CallState::Ringing => {}
        }
        if was_idle {
            self.last_call_check_ms = Some(self.ctx.now_ms);
        }
    }

    // ── Internal: SMS inbox ───────────────────────────────────

    fn schedule_inbox(&mut self) {
        let scheduled = self
            .dispatcher
            .tags()
            .any(|t| matches!(t, Tag::Inbox(step) if *step != InboxStep::Delete));
        if scheduled {
            return;
        }
        let timeout = self.command_timeout();
        let retries = self.ctx.config.command_retries;
        let setup = [
            ("AT+CMGF=1", InboxStep::TextMode),
            ("AT+CSDH=1", InboxStep::ShowHeaders),
            (Charset::Ucs2.select_command(), InboxStep::Charset),
        ];
        for (text, step) in setup {
            self.enqueue(Command::new(text, timeout, retries), Tag::Inbox(step));
        }
        self.enqueue(
            Command::new("AT+CMGL=\"REC UNREAD\"", timeout, retries)
                .with_matcher(ResponseMatcher::Listing("+CMGL:")),
            Tag::Inbox(InboxStep::List),
        );
    }

    fn on_inbox_reply(&mut self, step: InboxStep, result: Result<crate::at::Response, Error>) {
        let resp = match (step, result) {
            (InboxStep::List, Ok(resp)) => resp,
            (_, Ok(_)) => return,
            (InboxStep::Charset, Err(e)) => {
                warn!("UCS2 unavailable ({}), reading inbox as {:?}", e, self.charset);
                return;
            }
            (InboxStep::TextMode | InboxStep::ShowHeaders, Err(e)) => {
                warn!("inbox read aborted: {}", e);
                self.dispatcher.discard_where(|t| {
                    matches!(
                        t,
                        Tag::Inbox(InboxStep::ShowHeaders | InboxStep::Charset | InboxStep::List)
                    )
                });
                return;
            }
            (step, Err(e)) => {
                warn!("inbox {:?} failed: {}", step, e);
                return;
            }
        };

        // The line after a header with a non-zero length is body text even
        // when it looks like another header.
        let mut received: Vec<(urc::StoredSms, Vec<String>)> = Vec::new();
        let mut body_next = false;
        for line in &resp.lines {
            let header = fields::payload(line, "+CMGL:").filter(|_| !body_next);
            body_next = false;
            if let Some(p) = header {
                match urc::parse_listing_header(p) {
                    Ok(header) => {
                        body_next = fields::split(p).last().is_some_and(|len| *len != "0");
                        received.push((header, Vec::new()));
                    }
                    Err(e) => warn!("bad +CMGL header {:?}: {}", line, e),
                }
            } else if let Some((_, body)) = received.last_mut() {
                body.push(self.charset.decode(line));
            }
        }

        let timeout = self.command_timeout();
        let retries = self.ctx.config.command_retries;
        for (header, body) in received {
            let message = body.join("\n");
            let sender = self.charset.decode(&header.sender);
            info!("SMS #{} from {}", header.index, sender);
            self.outbox.push(ModemEvent::SmsReceived { message, sender });
            if self.ctx.config.delete_read_sms {
                self.enqueue(
                    Command::new(format!("AT+CMGD={}", header.index), timeout, retries),
                    Tag::Inbox(InboxStep::Delete),
                );
            }
        }
    }

    // ── Internal: unsolicited lines ───────────────────────────

    fn on_unsolicited(&mut self, line: &str) {
        let urc = match self.urc.parse(line) {
            Parsed::Event(urc) => urc,
            Parsed::NeedMore => return,
            Parsed::Unrecognized => {
                debug!("unhandled line: {}", line);
                return;
            }
        };

        match urc {
            Urc::Ring => {
                if self.call == CallState::Idle {
                    self.set_call(CallState::Ringing);
                }
            }
            Urc::CallerId(caller) => {
                if self.call == CallState::Idle {
                    self.set_call(CallState::Ringing);
                }
                self.announce_incoming(self.charset.decode(&caller));
            }
            Urc::CallStatus(status) => self.apply_call_status(status),
            Urc::CallBegin => self.set_call(CallState::Connected),
            Urc::CallEnd => self.set_call(CallState::Idle),
            Urc::NewSms { storage, index } => {
                debug!("new SMS in {} at {}", storage, index);
                self.schedule_inbox();
            }
            Urc::SmsDeliver { sender, message } => {
                let sender = self.charset.decode(&sender);
                let message = self.charset.decode(&message);
                info!("SMS from {}", sender);
                self.outbox.push(ModemEvent::SmsReceived { message, sender });
            }
            Urc::Ussd { status, text } => match text {
                Some(text) => {
                    let text = if self.ctx.config.ussd_hex {
                        fields::from_hex(&text).unwrap_or(text)
                    } else {
                        text
                    };
                    info!("USSD reply: {}", text);
                    self.outbox.push(ModemEvent::UssdReceived { text });
                }
                None => debug!("USSD session status {}", status),
            },
            Urc::Sim(sim) => self.ctx.link.sim = sim,
            Urc::Registration(reg) => self.apply_registration(reg),
            Urc::Signal(q) => self.apply_signal(q),
            Urc::ModemReady => {
                info!("modem ready");
                self.ctx.modem_ready();
            }
            Urc::Noise => trace!("ignored: {}", line),
        }
    }

    // ── Internal: events ──────────────────────────────────────

    fn deliver(&mut self, sink: &mut impl EventSink) {
        for event in core::mem::take(&mut self.outbox) {
            self.subscribers.dispatch(&event);
            sink.emit(&event);
        }
    }
}
