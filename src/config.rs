//! Modem configuration parameters
//!
//! All tunable parameters for the modem session.  Loaded from the device
//! configuration (JSON) at boot; every field has a default so partial
//! documents are accepted.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Baud rates the SIMCom UART auto-bauding accepts.
const SUPPORTED_BAUD_RATES: [u32; 8] = [
    9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600,
];

/// Core modem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    // --- Serial ---
    /// UART baud rate
    pub baud_rate: u32,

    // --- SIM ---
    /// SIM PIN, entered once when the SIM reports `SIM PIN`
    pub pin_code: Option<String>,

    // --- Timing ---
    /// Status polling interval (milliseconds)
    pub update_interval_ms: u32,
    /// Deadline for a single command attempt (milliseconds)
    pub command_timeout_ms: u32,
    /// Re-sends after a timeout before `Timeout` is reported
    pub command_retries: u8,
    /// Deadline for the SMS submit result after the body is sent
    pub sms_timeout_ms: u32,
    /// Grace period after power-on before the first probe
    pub boot_delay_ms: u32,
    /// Power key pulse length when power cycling an unresponsive modem
    pub power_pulse_ms: u32,
    /// Time allowed for the modem to boot after a power cycle
    pub modem_boot_timeout_ms: u32,
    /// Call list polling interval while a call is in progress
    pub call_check_interval_ms: u32,

    // --- Behaviour ---
    /// USSD strings are exchanged hex-encoded
    pub ussd_hex: bool,
    /// Delete SMS from SIM storage after they were delivered
    pub delete_read_sms: bool,
    /// Start with raw AT stream logging enabled
    pub debug: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            // Serial
            baud_rate: 115_200,

            // SIM
            pin_code: None,

            // Timing
            update_interval_ms: 5_000,
            command_timeout_ms: 5_000,
            command_retries: 2,
            sms_timeout_ms: 60_000,
            boot_delay_ms: 10_000,
            power_pulse_ms: 1_000,
            modem_boot_timeout_ms: 30_000,
            call_check_interval_ms: 500,

            // Behaviour
            ussd_hex: true,
            delete_read_sms: true,
            debug: false,
        }
    }
}

impl ModemConfig {
    /// Parse a JSON document, filling missing fields with defaults, and
    /// validate the result.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the session misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ConfigError::ValidationFailed("baud_rate not supported"));
        }
        if let Some(pin) = &self.pin_code {
            if !(4..=8).contains(&pin.len()) || !pin.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::ValidationFailed("pin_code must be 4-8 digits"));
            }
        }
        if self.update_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("update_interval_ms must be > 0"));
        }
        if self.command_timeout_ms == 0 || self.sms_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("command timeouts must be > 0"));
        }
        if self.call_check_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("call_check_interval_ms must be > 0"));
        }
        Ok(())
    }
}

/// Errors from loading or validating [`ModemConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document is not valid JSON or has wrongly typed fields.
    Malformed,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "config malformed"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl core::error::Error for ConfigError {}
