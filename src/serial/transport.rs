//! Byte stream transports for the headset link

use std::io::Read;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};

/// Serial port paired with the headset over Bluetooth RFCOMM
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// Fixed headset line rate
pub const BAUD_RATE: u32 = 57_600;

/// Raw byte stream handed to a frame reader
pub type ByteStream = Box<dyn Read + Send>;

/// Opens the byte stream for a device address
pub trait Transport: Send + Sync {
    fn open(&self, address: &str, read_timeout: Duration) -> Result<ByteStream>;
}

/// Serial port transport (57600 baud, 8N1)
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn open(&self, address: &str, read_timeout: Duration) -> Result<ByteStream> {
        info!("CONNECT {}, {}", address, BAUD_RATE);

        let port = serialport::new(address, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| Error::Connect {
                target: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(port))
    }
}

/// List serial ports that could carry a paired headset
pub fn list_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}
