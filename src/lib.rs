//! Cellular modem session manager.
//!
//! Drives a SIMCom-style modem over its AT command port: brings the
//! session up (probe, SIM PIN, network registration), keeps it polled,
//! and exposes SMS, voice call and USSD actions plus event subscriptions.
//! Everything above the [`at::Transport`] port is pure logic and runs on
//! the host; ESP-IDF specifics are gated behind the `espidf` feature.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod at;
pub mod config;
pub mod error;
pub mod fsm;
pub mod pins;

pub use error::{Error, Result};
