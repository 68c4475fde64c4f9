// Connected ODrive handle
//
// Wraps the ASCII protocol and exposes the few properties the
// diagnostic needs.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::{debug, info};

use super::ascii::{AsciiProtocol, OdriveError, Result};
use crate::config::{REQUEST_TIMEOUT, SERIAL_BAUDRATE, VBUS_PROPERTY};
use crate::messages::{AxisErrors, DeviceStatus};

/// Ports that can drop bytes received before the first request
pub trait ClearInput {
    fn clear_input(&mut self) -> Result<()>;
}

impl ClearInput for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> Result<()> {
        self.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

/// An ODrive reachable over its USB CDC port
pub struct Odrive<T = Box<dyn SerialPort>> {
    proto: AsciiProtocol<T>,
    port_name: String,
    serial_number: Option<String>,
}

impl Odrive {
    /// Open the CDC port of an ODrive
    pub fn open(port_name: &str, serial_number: Option<String>) -> Result<Self> {
        info!("Opening ODrive on {}", port_name);
        let port = serialport::new(port_name, SERIAL_BAUDRATE)
            .timeout(REQUEST_TIMEOUT)
            .open()?;

        Self::connect(port, port_name, serial_number)
    }
}

impl<T: Read + Write + ClearInput> Odrive<T> {
    /// Take over an open port, discarding whatever an earlier session left unread
    pub fn connect(mut port: T, port_name: &str, serial_number: Option<String>) -> Result<Self> {
        port.clear_input()?;
        Ok(Self {
            proto: AsciiProtocol::new(port),
            port_name: port_name.to_string(),
            serial_number,
        })
    }
}

impl<T: Read + Write> Odrive<T> {
    /// Send line checksums on every request
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.proto = self.proto.with_checksum(enabled);
        self
    }

    /// Supply voltage measured by the controller, in volts
    pub fn vbus_voltage(&mut self) -> Result<f64> {
        let vbus = self.proto.read_f64(VBUS_PROPERTY)?;
        debug!("vbus_voltage = {}", vbus);
        Ok(vbus)
    }

    /// Read any property by its dotted path, e.g. "axis0.current_state"
    pub fn read_property(&mut self, path: &str) -> Result<String> {
        self.proto.read_property(path)
    }

    /// Read a property that older or newer firmware may not have.
    /// `Ok(None)` when the firmware rejects the path.
    fn read_optional<V: FromStr>(&mut self, path: &str) -> Result<Option<V>> {
        let text = match self.read_property(path) {
            Ok(text) => text,
            Err(OdriveError::Rejected { .. }) => {
                debug!("{} not present on this firmware", path);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        text.parse().map(Some).map_err(|_| OdriveError::InvalidResponse {
            property: path.to_string(),
            reason: format!("expected an integer, got '{}'", text),
        })
    }

    /// Serial number, axis0 state and error registers
    pub fn read_status(&mut self) -> Result<DeviceStatus> {
        let serial_number = match self.read_optional::<u64>("serial_number")? {
            Some(serial) => format!("{:#x}", serial),
            None => self
                .serial_number
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };

        let axis_state: u32 = self.read_optional("axis0.current_state")?.unwrap_or(0);
        let errors = AxisErrors {
            axis: self.read_optional("axis0.error")?.unwrap_or(0),
            motor: self.read_optional("axis0.motor.error")?.unwrap_or(0),
            controller: self.read_optional("axis0.controller.error")?.unwrap_or(0),
            encoder: self.read_optional("axis0.encoder.error")?.unwrap_or(0),
        };

        Ok(DeviceStatus {
            serial_number,
            axis_state,
            errors,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Serial number from the USB descriptor, if the OS reported one
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }
}
