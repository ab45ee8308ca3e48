//! Cellular modem firmware — main entry point.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                    │
//! │                                                           │
//! │  UartTransport   PinDriver(PWRKEY)   SystemClock          │
//! │  (Transport)     (OutputPin)         (Clock)              │
//! │  LogEventSink    ACTION_CHANNEL                           │
//! │  (EventSink)     (actions from other tasks)               │
//! │                                                           │
//! │  ─────────────── Port Trait Boundary ─────────────────    │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │           ModemService (pure logic)                 │  │
//! │  │  AT dispatcher · URC parser · session FSM           │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::hal::units::Hertz;

use cellmodem::adapters::log_sink::LogEventSink;
use cellmodem::adapters::time::SystemClock;
use cellmodem::adapters::uart::UartTransport;
use cellmodem::app::service::ModemService;
use cellmodem::at::channels::ACTION_CHANNEL;
use cellmodem::config::ModemConfig;
use cellmodem::pins;

/// Optional JSON configuration baked in at build time.
const CONFIG_JSON: Option<&str> = option_env!("CELLMODEM_CONFIG");

fn load_config() -> ModemConfig {
    let Some(json) = CONFIG_JSON else {
        info!("Config: defaults");
        return ModemConfig::default();
    };
    match ModemConfig::from_json(json) {
        Ok(cfg) => {
            info!("Config: loaded from CELLMODEM_CONFIG");
            cfg
        }
        Err(e) => {
            warn!("Config: {}, using defaults", e);
            ModemConfig::default()
        }
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  cellmodem v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = load_config();

    // ── 3. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;

    let uart_config = uart::config::Config::default()
        .baudrate(Hertz(config.baud_rate))
        .rx_fifo_size(pins::MODEM_UART_RX_BUFFER);

    // SAFETY: the pin numbers come from `pins` and are not claimed elsewhere.
    let (tx, rx, pwrkey) = unsafe {
        (
            AnyIOPin::new(pins::MODEM_TX_GPIO),
            AnyIOPin::new(pins::MODEM_RX_GPIO),
            AnyOutputPin::new(pins::MODEM_PWRKEY_GPIO),
        )
    };

    // UART0 stays on the console.
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    info!(
        "Modem UART initialised at {} baud (tx={}, rx={})",
        config.baud_rate,
        pins::MODEM_TX_GPIO,
        pins::MODEM_RX_GPIO
    );

    let mut power = PinDriver::output(pwrkey)?;
    power.set_low()?;

    // ── 4. Service ────────────────────────────────────────────
    let mut sink = LogEventSink::new();
    let mut modem = ModemService::new(
        config,
        UartTransport::new(uart),
        Some(power),
        SystemClock::new(),
    );

    modem
        .subscribers_mut()
        .on_sms_received(|message, sender| info!("inbox: {} says {:?}", sender, message));
    modem
        .subscribers_mut()
        .on_incoming_call(|caller| info!("ringing: {}", caller));

    modem.start();

    info!("System ready. Entering event loop.");

    // ── 5. Event loop ─────────────────────────────────────────
    loop {
        modem.drain_actions(&ACTION_CHANNEL);
        modem.tick(&mut sink);
        std::thread::sleep(std::time::Duration::from_millis(pins::LOOP_INTERVAL_MS));
    }
}
