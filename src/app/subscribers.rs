//! Event subscriber table.
//!
//! One ordered listener list per [`EventKind`], filled at configuration
//! time through the typed `on_*` methods and never shrunk.  Dispatch
//! indexes the table by the event's kind and calls every listener in
//! registration order.
//!
//! ```text
//!  ModemEvent ──kind()──▶ table[kind] ──▶ listener 0, listener 1, ...
//! ```

use log::trace;

use super::events::{EventKind, ModemEvent};
use super::ports::EventSink;
use crate::at::urc::SignalQuality;
use crate::fsm::ModemState;

type PairFn = Box<dyn FnMut(&str, &str)>;
type TextFn = Box<dyn FnMut(&str)>;
type UnitFn = Box<dyn FnMut()>;

enum Listener {
    /// `(message, peer)` / `(error, recipient)`
    Pair(PairFn),
    Text(TextFn),
    Unit(UnitFn),
    Flag(Box<dyn FnMut(bool)>),
    Signal(Box<dyn FnMut(SignalQuality)>),
    Transition(Box<dyn FnMut(ModemState, ModemState)>),
}

/// Registered callbacks, grouped by event kind.
pub struct Subscribers {
    table: [Vec<Listener>; EventKind::COUNT],
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscribers {
    pub fn new() -> Self {
        Self {
            table: core::array::from_fn(|_| Vec::new()),
        }
    }

    fn add(&mut self, kind: EventKind, listener: Listener) {
        self.table[kind as usize].push(listener);
    }

    /// `(message, sender)`
    pub fn on_sms_received(&mut self, f: impl FnMut(&str, &str) + 'static) {
        self.add(EventKind::SmsReceived, Listener::Pair(Box::new(f)));
    }

    /// `(message, recipient)`
    pub fn on_sms_sent(&mut self, f: impl FnMut(&str, &str) + 'static) {
        self.add(EventKind::SmsSent, Listener::Pair(Box::new(f)));
    }

    /// `(error, recipient)`
    pub fn on_sms_send_failed(&mut self, f: impl FnMut(&str, &str) + 'static) {
        self.add(EventKind::SmsSendFailed, Listener::Pair(Box::new(f)));
    }

    /// `(caller_id)`
    pub fn on_incoming_call(&mut self, f: impl FnMut(&str) + 'static) {
        self.add(EventKind::IncomingCall, Listener::Text(Box::new(f)));
    }

    pub fn on_call_connected(&mut self, f: impl FnMut() + 'static) {
        self.add(EventKind::CallConnected, Listener::Unit(Box::new(f)));
    }

    pub fn on_call_disconnected(&mut self, f: impl FnMut() + 'static) {
        self.add(EventKind::CallDisconnected, Listener::Unit(Box::new(f)));
    }

    /// `(ussd)`
    pub fn on_ussd_received(&mut self, f: impl FnMut(&str) + 'static) {
        self.add(EventKind::UssdReceived, Listener::Text(Box::new(f)));
    }

    pub fn on_registration_changed(&mut self, f: impl FnMut(bool) + 'static) {
        self.add(EventKind::RegistrationChanged, Listener::Flag(Box::new(f)));
    }

    pub fn on_signal_quality(&mut self, f: impl FnMut(SignalQuality) + 'static) {
        self.add(EventKind::SignalQuality, Listener::Signal(Box::new(f)));
    }

    /// `(from, to)`
    pub fn on_state_changed(&mut self, f: impl FnMut(ModemState, ModemState) + 'static) {
        self.add(EventKind::StateChanged, Listener::Transition(Box::new(f)));
    }

    /// Number of listeners for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.table[kind as usize].len()
    }

    /// Call every listener of the event's kind, in registration order.
    pub fn dispatch(&mut self, event: &ModemEvent) {
        let listeners = &mut self.table[event.kind() as usize];
        trace!("dispatching {:?} to {} listener(s)", event.kind(), listeners.len());
        for listener in listeners.iter_mut() {
            match (listener, event) {
                (Listener::Pair(f), ModemEvent::SmsReceived { message, sender }) => f(message.as_str(), sender.as_str()),
                (Listener::Pair(f), ModemEvent::SmsSent { message, recipient }) => f(message.as_str(), recipient.as_str()),
                (Listener::Pair(f), ModemEvent::SmsSendFailed { error, recipient }) => f(error.as_str(), recipient.as_str()),
                (Listener::Text(f), ModemEvent::IncomingCall { caller_id }) => f(caller_id.as_str()),
                (Listener::Text(f), ModemEvent::UssdReceived { text }) => f(text.as_str()),
                (Listener::Unit(f), ModemEvent::CallConnected | ModemEvent::CallDisconnected) => f(),
                (Listener::Flag(f), ModemEvent::RegistrationChanged(on)) => f(*on),
                (Listener::Signal(f), ModemEvent::SignalQuality(q)) => f(*q),
                (Listener::Transition(f), ModemEvent::StateChanged { from, to }) => f(*from, *to),
                // Listener shapes are fixed by the typed registration methods.
                _ => debug_assert!(false, "listener shape mismatch for {:?}", event.kind()),
            }
        }
    }
}

impl EventSink for Subscribers {
    fn emit(&mut self, event: &ModemEvent) {
        self.dispatch(event);
    }
}
