//! Serial port link over tokio-serial.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use super::traits::{LinkError, SerialLink};

/// Serial port configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity ("none", "even", "odd")
    pub parity: String,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Inter-byte idle window for reads, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/serial/by-path/platform-xhci-hcd.1.auto-usb-0:1.1.1:1.0-port0".to_string(),
            baud_rate: 115_200,
            parity: "even".to_string(),
            stop_bits: 1,
            read_timeout_ms: 2000,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), LinkError> {
        let invalid = |reason: &str| LinkError::Open {
            device: self.device.clone(),
            reason: reason.to_string(),
        };

        if self.device.is_empty() {
            return Err(invalid("device path cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(invalid("baud rate must be greater than zero"));
        }
        if !["none", "even", "odd"].contains(&self.parity.as_str()) {
            return Err(invalid("parity must be none, even, or odd"));
        }
        if ![1, 2].contains(&self.stop_bits) {
            return Err(invalid("stop bits must be 1 or 2"));
        }
        if self.read_timeout_ms == 0 {
            return Err(invalid("read timeout must be greater than zero"));
        }
        Ok(())
    }

    fn parse_parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn parse_stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// Serial link over a real port: 8 data bits, no flow control, raw byte
/// stream with an inter-byte idle timeout on reads.
#[derive(Debug)]
pub struct SerialPortLink {
    port: SerialStream,
    device: String,
    idle_timeout: Duration,
}

impl SerialPortLink {
    /// Open and configure the device. Failure here is fatal at startup.
    pub fn open(config: &SerialConfig) -> Result<Self, LinkError> {
        config.validate()?;

        debug!("opening serial device {}", config.device);
        let port = tokio_serial::new(&config.device, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(config.parse_parity())
            .stop_bits(config.parse_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open_native_async()
            .map_err(|e| LinkError::Open {
                device: config.device.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            port,
            device: config.device.clone(),
            idle_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        let written = self
            .port
            .write(data)
            .await
            .map_err(|e| LinkError::Write(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| LinkError::Write(e.to_string()))?;
        trace!("TX {} of {} bytes on {}", written, data.len(), self.device);
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut total = 0;
        while total < buf.len() {
            match timeout(self.idle_timeout, self.port.read(&mut buf[total..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) => return Err(LinkError::Read(e.to_string())),
                // Line went quiet; a short count is the normal timeout signal.
                Err(_) => {
                    trace!("read idle timeout after {} of {} bytes", total, buf.len());
                    break;
                }
            }
        }
        Ok(total)
    }

    async fn flush_input(&mut self) -> Result<(), LinkError> {
        debug!("flushing serial input buffer on {}", self.device);
        SerialPort::clear(&self.port, ClearBuffer::Input)
            .map_err(|e| LinkError::Flush(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SerialConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.parity, "even");
        assert_eq!(config.stop_bits, 1);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let mut config = SerialConfig::default();
        config.device = String::new();
        assert!(config.validate().is_err());

        config = SerialConfig::default();
        config.baud_rate = 0;
        assert!(config.validate().is_err());

        config = SerialConfig::default();
        config.parity = "mark".to_string();
        assert!(config.validate().is_err());

        config = SerialConfig::default();
        config.stop_bits = 3;
        assert!(config.validate().is_err());

        config = SerialConfig::default();
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
