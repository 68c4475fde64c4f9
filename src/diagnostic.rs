// One-shot connection check: load USB access, find an ODrive, read vbus
//
// Every discovery/read failure goes through one error path with the same
// troubleshooting list. Only a broken USB backend gets its own message.

use std::io::{self, Write};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DISCOVERY_TIMEOUT, TROUBLESHOOTING};
use crate::messages::{DeviceStatus, StatusReport};
use crate::odrive::{self, Odrive, OdriveError, PortSource, UsbPorts};

/// Something the diagnostic can read telemetry from
pub trait Telemetry {
    fn vbus_voltage(&mut self) -> Result<f64, OdriveError>;

    /// Serial number, axis state and error registers
    fn device_status(&mut self) -> Result<DeviceStatus, OdriveError>;
}

impl Telemetry for Odrive {
    fn vbus_voltage(&mut self) -> Result<f64, OdriveError> {
        Odrive::vbus_voltage(self)
    }

    fn device_status(&mut self) -> Result<DeviceStatus, OdriveError> {
        self.read_status()
    }
}

/// Device access layer used by the diagnostic
pub trait DeviceAccess {
    type Device: Telemetry;

    /// Make sure the access layer itself works, before touching any device
    fn load(&self) -> Result<(), OdriveError>;

    /// How to fix a failed `load`
    fn install_hint(&self) -> &'static str;

    /// Find and connect to any ODrive, waiting at most `timeout`
    fn find_any(&self, timeout: Duration) -> Result<Self::Device, OdriveError>;
}

/// Real access through USB serial ports
#[derive(Debug, Default)]
pub struct UsbSerialAccess {
    /// Fixed port, skips enumeration when set
    pub port: Option<String>,
    pub ports: UsbPorts,
}

impl UsbSerialAccess {
    pub fn new(port: Option<String>, checksum: bool) -> Self {
        Self {
            port,
            ports: UsbPorts::new(checksum),
        }
    }
}

impl DeviceAccess for UsbSerialAccess {
    type Device = Odrive;

    fn load(&self) -> Result<(), OdriveError> {
        let ports = odrive::probe()?;
        info!("USB serial backend ready, {} port(s) present", ports.len());
        Ok(())
    }

    // available_ports() fails on unreadable udev/sysfs (Linux) or a broken
    // SetupAPI/IOKit query, not on a missing shared library
    fn install_hint(&self) -> &'static str {
        if cfg!(target_os = "linux") {
            "make sure udev is running and /sys plus /run/udev are readable \
             (in containers, mount them into the container)"
        } else if cfg!(target_os = "windows") {
            "check that Device Manager lists USB devices, then reinstall the ODrive driver with zadig.exe"
        } else {
            "check that the system can list USB serial devices (ls /dev/cu.*)"
        }
    }

    fn find_any(&self, timeout: Duration) -> Result<Odrive, OdriveError> {
        let odrv = match &self.port {
            Some(port) => self.ports.open(port, None)?,
            None => odrive::find_any(&self.ports, timeout)?,
        };
        info!(
            "ODrive on {} (serial number {})",
            odrv.port_name(),
            odrv.serial_number().unwrap_or("unknown")
        );
        Ok(odrv)
    }
}

/// What a run checks
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Upper bound for discovery
    pub timeout: Duration,
    /// Also read serial number, axis state and error registers
    pub status: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: DISCOVERY_TIMEOUT,
            status: false,
        }
    }
}

/// Result of one diagnostic run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Connected(StatusReport),
    LibraryUnavailable,
    DeviceError,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Connected(_) => 0,
            Outcome::LibraryUnavailable | Outcome::DeviceError => 1,
        }
    }
}

/// Run the full check, writing human-readable text (and the JSON line) to `out`
pub fn run<A, W>(access: &A, options: &Options, out: &mut W) -> io::Result<Outcome>
where
    A: DeviceAccess,
    W: Write,
{
    // Step 1: access layer
    match access.load() {
        Ok(()) => writeln!(out, "✓ ODrive USB interface available")?,
        Err(e) => {
            warn!("USB access unavailable: {}", e);
            writeln!(out, "✗ Failed to load ODrive USB interface: {}", e)?;
            writeln!(out, "  Install with: {}", access.install_hint())?;
            return Ok(Outcome::LibraryUnavailable);
        }
    }

    // Step 2 + 3: discovery and read share one error path
    writeln!(out)?;
    writeln!(out, "Searching for ODrive...")?;
    out.flush()?;

    match connect_and_read(access, options, out) {
        Ok(report) => {
            writeln!(out)?;
            writeln!(out, "JSON output:")?;
            writeln!(out, "{}", report.to_json_line()?)?;
            writeln!(out)?;
            writeln!(out, "✅ ODrive is working correctly!")?;
            Ok(Outcome::Connected(report))
        }
        Err(CheckError::Device(e)) => {
            warn!("ODrive check failed: {}", e);
            writeln!(out, "✗ Error: {}", e)?;
            writeln!(out)?;
            writeln!(out, "Troubleshooting:")?;
            for hint in TROUBLESHOOTING {
                writeln!(out, "{}", hint)?;
            }
            Ok(Outcome::DeviceError)
        }
        Err(CheckError::Output(e)) => Err(e),
    }
}

/// Device failures are reported, output failures abort the run
enum CheckError {
    Device(OdriveError),
    Output(io::Error),
}

impl From<OdriveError> for CheckError {
    fn from(e: OdriveError) -> Self {
        CheckError::Device(e)
    }
}

impl From<io::Error> for CheckError {
    fn from(e: io::Error) -> Self {
        CheckError::Output(e)
    }
}

fn connect_and_read<A, W>(
    access: &A,
    options: &Options,
    out: &mut W,
) -> Result<StatusReport, CheckError>
where
    A: DeviceAccess,
    W: Write,
{
    let mut device = access.find_any(options.timeout)?;
    writeln!(out, "✓ ODrive found!")?;

    let vbus = device.vbus_voltage()?;
    writeln!(out, "✓ Bus voltage: {:.2}V", vbus)?;

    let report = StatusReport::connected(vbus);
    if !options.status {
        return Ok(report);
    }

    let status = device.device_status()?;
    writeln!(out, "✓ Serial number: {}", status.serial_number)?;
    writeln!(
        out,
        "✓ Axis state: {} ({})",
        status.axis_state,
        status.axis_state_name()
    )?;
    // Errors are reported, the device is still reachable
    if status.errors.any() {
        writeln!(out, "⚠ Errors: {}", status.errors)?;
    } else {
        writeln!(out, "✓ No errors")?;
    }

    Ok(report.with_device_status(status))
}
