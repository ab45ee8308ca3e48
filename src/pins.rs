//! GPIO / peripheral assignments for the modem carrier board.
//!
//! Single source of truth for the wiring between the ESP32 and the SIMCom
//! module.  Change a pin here and `main` picks it up.

// ---------------------------------------------------------------------------
// Modem UART
// ---------------------------------------------------------------------------

/// ESP32 TX → modem RXD.
pub const MODEM_TX_GPIO: i32 = 17;
/// ESP32 RX ← modem TXD.
pub const MODEM_RX_GPIO: i32 = 18;

// ---------------------------------------------------------------------------
// Modem control
// ---------------------------------------------------------------------------

/// PWRKEY line, driven through an NPN stage: HIGH pulls the key low.
pub const MODEM_PWRKEY_GPIO: i32 = 4;

/// Bytes of RX ring buffer for the UART driver; sized for a full `+CMGL`
/// listing burst between two ticks.
pub const MODEM_UART_RX_BUFFER: usize = 2_048;

/// Main loop period.
pub const LOOP_INTERVAL_MS: u64 = 20;
