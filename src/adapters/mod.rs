//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements | Connects to                 |
//! |------------|------------|-----------------------------|
//! | `log_sink` | EventSink  | Serial log output           |
//! | `time`     | Clock      | ESP32 system timer / host   |
//! | `uart`     | Transport  | ESP-IDF UART driver (modem) |

pub mod log_sink;
pub mod time;
#[cfg(feature = "espidf")]
pub mod uart;
