//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that drives `ModemService` end to end
//! against the scripted modem in `mock_hw`.  All tests run on the host
//! with no real hardware required.

// Host implementation of `critical-section` for the embassy-sync channel.
use critical_section as _;

mod action_tests;
mod message_tests;
mod mock_hw;
