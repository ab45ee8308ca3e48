//! Command dispatcher — serialises AT exchanges over a half-duplex link.
//!
//! ```text
//!  submit() ──▶ ┌──────────────┐  start_next()  ┌───────────┐
//!               │ FIFO (16)    │ ─────────────▶ │ in flight │ ──▶ Completion
//!               └──────────────┘                └───────────┘
//!                                  on_line() ▲      │ expire()
//!                                            │      ▼
//!                               lines from LineReader   retry / Timeout
//! ```
//!
//! At most one command is in flight.  Every line read from the modem is
//! offered to the in-flight command first ([`Dispatcher::on_line`]); lines
//! it does not claim come back as [`LineRoute::Unsolicited`] for the URC
//! parser.  Each submitted command completes exactly once, unless its owner
//! discards it while it is still queued.
//!
//! The dispatcher is generic over a caller tag `T` that travels with the
//! command and comes back in the [`Completion`], so the owner can route the
//! result without closures borrowing its state.

use log::{debug, info, warn};

use super::command::{Command, FinalCode, Response, ResponseMatcher, classify_final};
use super::fields;
use super::line::Line;
use super::transport::{Transport, write_all};
use super::urc;
use crate::error::{Error, Result};

/// Maximum number of queued commands.
pub const QUEUE_DEPTH: usize = 16;

const CTRL_Z: u8 = 0x1A;

/// Result of a finished command, handed back with its tag.
#[derive(Debug)]
pub struct Completion<T> {
    pub tag: T,
    /// Command text, for logging.
    pub command: String,
    pub result: Result<Response>,
}

/// What [`Dispatcher::on_line`] did with a line.
#[derive(Debug)]
pub enum LineRoute<T> {
    /// Absorbed by the in-flight command (echo, prompt, intermediate line).
    Consumed,
    /// The line finished the in-flight command.
    Completed(Completion<T>),
    /// Not part of the current exchange.
    Unsolicited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitPrompt,
    AwaitFinal,
}

struct InFlight<T> {
    command: Command,
    tag: T,
    attempt: u8,
    deadline_ms: u64,
    phase: Phase,
    lines: Vec<String>,
    /// A `Listing` header was seen; continuation lines now belong to us.
    listing: bool,
    /// The next line is a record body, never a result code.
    body_next: bool,
    payload_sent: bool,
}

impl<T> InFlight<T> {
    fn initial_phase(command: &Command) -> Phase {
        if command.payload.is_some() {
            Phase::AwaitPrompt
        } else {
            Phase::AwaitFinal
        }
    }

    fn complete(self, result: Result<Response>) -> Completion<T> {
        Completion {
            tag: self.tag,
            command: self.command.text,
            result,
        }
    }
}

/// FIFO command executor.
pub struct Dispatcher<T> {
    queue: heapless::Deque<(Command, T), QUEUE_DEPTH>,
    in_flight: Option<InFlight<T>>,
    /// Log the raw TX stream at `info` instead of `debug`.
    verbose: bool,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            queue: heapless::Deque::new(),
            in_flight: None,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Queue a command.  On a full queue the tag is handed back so the
    /// caller can report the failure.
    pub fn submit(&mut self, command: Command, tag: T) -> core::result::Result<(), T> {
        self.queue.push_back((command, tag)).map_err(|(_, tag)| tag)
    }

    /// No command in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Free queue slots.
    pub fn capacity_left(&self) -> usize {
        QUEUE_DEPTH - self.queue.len()
    }

    /// The in-flight command is waiting for the `>` prompt.
    pub fn awaiting_prompt(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.phase == Phase::AwaitPrompt)
    }

    /// Queued plus in-flight commands.
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    /// Tags of the in-flight command and everything queued, in order.
    pub fn tags(&self) -> impl Iterator<Item = &T> {
        self.in_flight
            .iter()
            .map(|f| &f.tag)
            .chain(self.queue.iter().map(|(_, t)| t))
    }

    /// Transmit the next queued command if nothing is in flight.
    ///
    /// On a write error the command stays in flight so that
    /// [`abort_all`](Self::abort_all) completes it.
    pub fn start_next<Tr: Transport>(&mut self, transport: &mut Tr, now_ms: u64) -> Result<()> {
        if self.in_flight.is_some() {
            return Ok(());
        }
        let Some((command, tag)) = self.queue.pop_front() else {
            return Ok(());
        };
        let flight = InFlight {
            phase: InFlight::<T>::initial_phase(&command),
            deadline_ms: now_ms + duration_ms(&command),
            command,
            tag,
            attempt: 0,
            lines: Vec::new(),
            listing: false,
            body_next: false,
            payload_sent: false,
        };
        let text = flight.command.text.clone();
        self.in_flight = Some(flight);
        send_line(transport, &text, self.verbose)
    }

    /// Offer a line to the in-flight command.
    pub fn on_line<Tr: Transport>(
        &mut self,
        line: &Line,
        transport: &mut Tr,
        now_ms: u64,
    ) -> Result<LineRoute<T>> {
        let Some(flight) = self.in_flight.as_mut() else {
            return Ok(LineRoute::Unsolicited);
        };

        let text = match line {
            Line::Prompt => {
                if flight.phase != Phase::AwaitPrompt {
                    return Ok(LineRoute::Unsolicited);
                }
                let payload = flight.command.payload.clone().unwrap_or_default();
                flight.phase = Phase::AwaitFinal;
                flight.payload_sent = true;
                flight.deadline_ms = now_ms + duration_ms(&flight.command);
                send_payload(transport, &payload, self.verbose)?;
                return Ok(LineRoute::Consumed);
            }
            Line::Text(text) => text,
        };

        if flight.body_next {
            flight.body_next = false;
            flight.lines.push(text.clone());
            return Ok(LineRoute::Consumed);
        }

        // Echo is on until ATE0 has been processed.
        if !flight.payload_sent && flight.lines.is_empty() && *text == flight.command.text {
            return Ok(LineRoute::Consumed);
        }

        if let Some(code) = classify_final(text) {
            let Some(flight) = self.in_flight.take() else {
                return Ok(LineRoute::Unsolicited);
            };
            let result = match (code, flight.phase, flight.command.matcher) {
                (FinalCode::Ok, Phase::AwaitFinal, _) | (FinalCode::Error, _, ResponseMatcher::Raw) => {
                    Ok(Response {
                        lines: flight.lines.clone(),
                        final_line: text.clone(),
                    })
                }
                (FinalCode::Ok, Phase::AwaitPrompt, _) => {
                    warn!("{}: OK before input prompt", flight.command.text);
                    Err(Error::Modem(text.clone()))
                }
                (FinalCode::Error, _, _) => {
                    warn!("{}: {}", flight.command.text, text);
                    Err(Error::Modem(text.clone()))
                }
            };
            return Ok(LineRoute::Completed(flight.complete(result)));
        }

        let belongs = match flight.command.matcher {
            ResponseMatcher::Final => false,
            ResponseMatcher::Prefix(prefix) => text.starts_with(prefix),
            ResponseMatcher::Listing(prefix) => {
                if let Some(header) = fields::payload(text, prefix) {
                    flight.listing = true;
                    flight.body_next = !announces_empty_body(header);
                }
                flight.listing
            }
            ResponseMatcher::Raw => {
                !urc::is_unsolicited(text) || flight.command.is_own_answer(text)
            }
        };
        if belongs {
            flight.lines.push(text.clone());
            Ok(LineRoute::Consumed)
        } else {
            Ok(LineRoute::Unsolicited)
        }
    }

    /// Handle the deadline of the in-flight command: re-send it while
    /// retries remain, otherwise complete it with [`Error::Timeout`].
    pub fn expire<Tr: Transport>(
        &mut self,
        transport: &mut Tr,
        now_ms: u64,
    ) -> Result<Option<Completion<T>>> {
        let Some(flight) = self.in_flight.as_mut() else {
            return Ok(None);
        };
        if now_ms < flight.deadline_ms {
            return Ok(None);
        }

        if flight.attempt < flight.command.retries && !flight.payload_sent {
            flight.attempt += 1;
            flight.lines.clear();
            flight.listing = false;
            flight.body_next = false;
            flight.phase = InFlight::<T>::initial_phase(&flight.command);
            flight.deadline_ms = now_ms + duration_ms(&flight.command);
            warn!(
                "{}: no response, retry {}/{}",
                flight.command.text, flight.attempt, flight.command.retries
            );
            let text = flight.command.text.clone();
            send_line(transport, &text, self.verbose)?;
            return Ok(None);
        }

        let Some(flight) = self.in_flight.take() else {
            return Ok(None);
        };
        warn!(
            "{}: timed out after {} attempt(s)",
            flight.command.text,
            flight.attempt + 1
        );
        Ok(Some(flight.complete(Err(Error::Timeout))))
    }

    /// Drop queued (not in-flight) commands whose tag matches.
    /// Returns how many were dropped.
    pub fn discard_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut kept = heapless::Deque::new();
        let mut dropped = 0;
        while let Some((command, tag)) = self.queue.pop_front() {
            if pred(&tag) {
                debug!("discarding queued {}", command.text);
                dropped += 1;
            } else {
                // Same capacity as the source queue.
                let _ = kept.push_back((command, tag));
            }
        }
        self.queue = kept;
        dropped
    }

    /// Complete every command (in flight first, then queued in order) with
    /// `error`.
    pub fn abort_all(&mut self, error: &Error) -> Vec<Completion<T>> {
        let mut out = Vec::with_capacity(self.pending());
        if let Some(flight) = self.in_flight.take() {
            out.push(flight.complete(Err(error.clone())));
        }
        while let Some((command, tag)) = self.queue.pop_front() {
            out.push(Completion {
                tag,
                command: command.text,
                result: Err(error.clone()),
            });
        }
        out
    }
}

/// A record header whose last field is a zero length (`AT+CSDH=1` form)
/// has no body line.
fn announces_empty_body(header: &str) -> bool {
    fields::split(header).last().is_some_and(|f| *f == "0")
}

fn duration_ms(command: &Command) -> u64 {
    command.timeout.as_millis() as u64
}

fn send_line<Tr: Transport>(transport: &mut Tr, text: &str, verbose: bool) -> Result<()> {
    if verbose {
        info!(">> {}", text);
    } else {
        debug!(">> {}", text);
    }
    write_all(transport, text.as_bytes())?;
    write_all(transport, b"\r\n")?;
    transport.flush().map_err(super::transport::transport_error)
}

fn send_payload<Tr: Transport>(transport: &mut Tr, payload: &str, verbose: bool) -> Result<()> {
    if verbose {
        info!(">> {}<ctrl-z>", payload);
    } else {
        debug!(">> {}<ctrl-z>", payload);
    }
    write_all(transport, payload.as_bytes())?;
    write_all(transport, &[CTRL_Z])?;
    transport.flush().map_err(super::transport::transport_error)
}
