//! ESP-IDF UART adapter.
//!
//! Wraps [`UartDriver`] behind the [`Transport`] port.  Reads never block:
//! the service polls once per tick and an empty FIFO yields `Ok(0)`.

use esp_idf_svc::hal::delay::{NON_BLOCK, TickType};
use esp_idf_svc::hal::uart::UartDriver;
use esp_idf_svc::sys::EspError;

use crate::at::transport::Transport;

/// Upper bound on how long `flush` waits for the TX FIFO to drain.
const TX_DRAIN_MS: u64 = 100;

/// Serial link to the modem over an ESP32 UART peripheral.
pub struct UartTransport<'d> {
    uart: UartDriver<'d>,
}

impl<'d> UartTransport<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self { uart }
    }
}

impl Transport for UartTransport<'_> {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.uart.read(buf, NON_BLOCK)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        self.uart.write(data)
    }

    fn flush(&mut self) -> Result<(), EspError> {
        let ticks = TickType::new_millis(TX_DRAIN_MS).ticks();
        self.uart.wait_tx_done(ticks)
    }

    fn available(&self) -> bool {
        self.uart.remaining_read().is_ok_and(|n| n > 0)
    }
}
