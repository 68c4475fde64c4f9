// Status record printed for Node-RED

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Connection status reported by the diagnostic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Connected,
}

// Output of a successful check -> one JSON line on stdout
// Field order matters: Node-RED flows match on the printed text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub status: Status,
    pub vbus_voltage: f64,

    // Only present for the extended status check, None adds no keys
    #[serde(flatten)]
    pub device: Option<DeviceStatus>,
}

impl StatusReport {
    pub fn connected(vbus_voltage: f64) -> Self {
        Self {
            status: Status::Connected,
            vbus_voltage,
            device: None,
        }
    }

    pub fn with_device_status(mut self, device: DeviceStatus) -> Self {
        self.device = Some(device);
        self
    }

    /// Serialize as a single JSON line with `", "` and `": "` separators,
    /// e.g. `{"status": "connected", "vbus_voltage": 23.567}`
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
        self.serialize(&mut ser)?;
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Read-only snapshot of axis0, same shape as the Node-RED status node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatus {
    /// Hex, e.g. "0x2087377e3548", or "unknown"
    pub serial_number: String,
    pub axis_state: u32,
    pub errors: AxisErrors,
}

impl DeviceStatus {
    /// Name of `axis_state` as the firmware's AxisState enum spells it
    pub fn axis_state_name(&self) -> &'static str {
        match self.axis_state {
            0 => "undefined",
            1 => "idle",
            2 => "startup sequence",
            3 => "full calibration sequence",
            4 => "motor calibration",
            6 => "encoder index search",
            7 => "encoder offset calibration",
            8 => "closed loop control",
            9 => "lockin spin",
            10 => "encoder dir find",
            11 => "homing",
            12 => "encoder hall polarity calibration",
            13 => "encoder hall phase calibration",
            _ => "unknown",
        }
    }
}

/// Error registers of axis0 and its sub-objects, 0 = no error
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AxisErrors {
    pub axis: u64,
    pub motor: u64,
    pub controller: u64,
    pub encoder: u64,
}

impl AxisErrors {
    pub fn any(&self) -> bool {
        self.axis != 0 || self.motor != 0 || self.controller != 0 || self.encoder != 0
    }
}

impl fmt::Display for AxisErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "axis={:#x} motor={:#x} controller={:#x} encoder={:#x}",
            self.axis, self.motor, self.controller, self.encoder
        )
    }
}

/// Compact JSON, but with a space after every `,` and `:`
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
