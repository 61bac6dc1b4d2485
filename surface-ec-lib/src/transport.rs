use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE};
use crate::error::ECError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::time::Duration;
use tracing::info;

/// How long a single read may block before handing control back to the session
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// UART settings for the EC link. Framing is fixed at 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub poll_interval: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SerialConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Open the port. The returned handle is a plain byte stream for [`crate::session::Session`].
    pub fn open(&self) -> Result<Box<dyn SerialPort>, ECError> {
        info!(path = %self.path, baud = self.baud_rate, "Opening EC serial link");
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.poll_interval)
            .open()?;
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SerialConfig::default();
        assert_eq!(config.path, "/dev/ttyS0");
        assert_eq!(config.baud_rate, 3_000_000);
        assert_eq!(SerialConfig::new("/dev/ttyS4", 115_200).poll_interval, config.poll_interval);
    }
}
