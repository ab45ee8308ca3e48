//! Application core — session logic, zero I/O.
//!
//! The [`service::ModemService`] ties the AT dispatcher, the URC parser
//! and the session FSM together.  All interaction with hardware happens
//! through the port traits in [`ports`] and the
//! [`Transport`](crate::at::Transport) port, keeping this layer fully
//! testable without a modem attached.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod subscribers;
