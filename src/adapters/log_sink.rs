//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`ModemEvent`] to the logger
//! (UART / USB-CDC console in production).  An MQTT or display adapter
//! would implement the same trait.

use log::{info, warn};

use crate::app::events::ModemEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ModemEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ModemEvent) {
        match event {
            ModemEvent::SmsReceived { message, sender } => {
                info!("SMS   | from={} | {:?}", sender, message);
            }
            ModemEvent::SmsSent { message, recipient } => {
                info!("SMS   | sent to={} | {} chars", recipient, message.chars().count());
            }
            ModemEvent::SmsSendFailed { error, recipient } => {
                warn!("SMS   | to={} failed: {}", recipient, error);
            }
            ModemEvent::IncomingCall { caller_id } => {
                info!("CALL  | incoming from {}", caller_id);
            }
            ModemEvent::CallConnected => info!("CALL  | connected"),
            ModemEvent::CallDisconnected => info!("CALL  | disconnected"),
            ModemEvent::UssdReceived { text } => {
                info!("USSD  | {}", text);
            }
            ModemEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            ModemEvent::RegistrationChanged(on) => {
                info!("NET   | {}", if *on { "registered" } else { "not registered" });
            }
            ModemEvent::SignalQuality(q) => match q.dbm() {
                Some(dbm) => info!("NET   | rssi={} ({} dBm) ber={}", q.rssi, dbm, q.ber),
                None => info!("NET   | rssi unknown ber={}", q.ber),
            },
        }
    }
}
