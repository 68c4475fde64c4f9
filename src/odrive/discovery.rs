// USB discovery of ODrive CDC ports
//
// find_any() keeps enumerating serial ports until one with the ODrive
// VID/PID opens, or the timeout runs out.

use serialport::{SerialPortInfo, SerialPortType};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::ascii::{OdriveError, Result};
use super::device::Odrive;
use crate::config::{DISCOVERY_POLL_INTERVAL, ODRIVE_USB_PIDS, ODRIVE_USB_VID};

/// Does this USB id pair belong to ODrive firmware?
pub fn is_odrive(vid: u16, pid: u16) -> bool {
    vid == ODRIVE_USB_VID && ODRIVE_USB_PIDS.contains(&pid)
}

/// Check that the USB serial backend works at all
pub fn probe() -> Result<Vec<SerialPortInfo>> {
    serialport::available_ports().map_err(OdriveError::Unavailable)
}

/// ODrive ports among the enumerated ones, as (port name, serial number)
fn candidates(ports: Vec<SerialPortInfo>) -> Vec<(String, Option<String>)> {
    ports
        .into_iter()
        .filter_map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) if is_odrive(usb.vid, usb.pid) => {
                Some((p.port_name, usb.serial_number))
            }
            _ => None,
        })
        .collect()
}

/// Where find_any gets its candidate ports from and how it opens them
pub trait PortSource {
    type Port;

    /// Currently attached ODrive ports, as (port name, serial number)
    fn candidates(&self) -> Result<Vec<(String, Option<String>)>>;

    fn open(&self, port_name: &str, serial_number: Option<String>) -> Result<Self::Port>;
}

/// Real USB serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct UsbPorts {
    /// Send line checksums on every request
    pub checksum: bool,
}

impl UsbPorts {
    pub fn new(checksum: bool) -> Self {
        Self { checksum }
    }
}

impl PortSource for UsbPorts {
    type Port = Odrive;

    fn candidates(&self) -> Result<Vec<(String, Option<String>)>> {
        let ports = serialport::available_ports()?;
        debug!("{} serial port(s) enumerated", ports.len());
        Ok(candidates(ports))
    }

    fn open(&self, port_name: &str, serial_number: Option<String>) -> Result<Odrive> {
        Ok(Odrive::open(port_name, serial_number)?.with_checksum(self.checksum))
    }
}

/// Wait up to `timeout` for any ODrive and connect to it
pub fn find_any<S: PortSource>(source: &S, timeout: Duration) -> Result<S::Port> {
    // Too far out for Instant: no deadline at all
    let deadline = Instant::now().checked_add(timeout);
    let mut last_error = None;

    info!("Searching for ODrive (timeout {:?})", timeout);

    loop {
        for (port_name, serial_number) in source.candidates()? {
            debug!("Candidate ODrive port {} (serial {:?})", port_name, serial_number);
            match source.open(&port_name, serial_number) {
                Ok(port) => {
                    info!("Connected to ODrive on {}", port_name);
                    return Ok(port);
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", port_name, e);
                    last_error = Some(e);
                }
            }
        }

        let now = Instant::now();
        let wait = match deadline {
            // A port that showed up but refused to open says more than a timeout
            Some(deadline) if now >= deadline => {
                return Err(last_error.unwrap_or(OdriveError::Timeout { timeout }));
            }
            Some(deadline) => DISCOVERY_POLL_INTERVAL.min(deadline - now),
            None => DISCOVERY_POLL_INTERVAL,
        };
        thread::sleep(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;

    /// Scripted ports: the device appears on poll `appears_on`,
    /// and opening fails while `open_fails` is set
    struct ScriptedPorts {
        appears_on: u32,
        open_fails: bool,
        polls: Cell<u32>,
        opens: Cell<u32>,
    }

    impl ScriptedPorts {
        fn new(appears_on: u32, open_fails: bool) -> Self {
            Self {
                appears_on,
                open_fails,
                polls: Cell::new(0),
                opens: Cell::new(0),
            }
        }
    }

    impl PortSource for ScriptedPorts {
        type Port = String;

        fn candidates(&self) -> Result<Vec<(String, Option<String>)>> {
            let poll = self.polls.get() + 1;
            self.polls.set(poll);
            if poll >= self.appears_on {
                Ok(vec![("/dev/ttyACM0".to_string(), Some("2087377E3548".to_string()))])
            } else {
                Ok(Vec::new())
            }
        }

        fn open(&self, port_name: &str, _serial_number: Option<String>) -> Result<String> {
            self.opens.set(self.opens.get() + 1);
            if self.open_fails {
                Err(OdriveError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "Permission denied",
                )))
            } else {
                Ok(port_name.to_string())
            }
        }
    }

    struct BrokenEnumeration;

    impl PortSource for BrokenEnumeration {
        type Port = String;

        fn candidates(&self) -> Result<Vec<(String, Option<String>)>> {
            Err(OdriveError::Serial(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "udev unavailable",
            )))
        }

        fn open(&self, _port_name: &str, _serial_number: Option<String>) -> Result<String> {
            unreachable!("nothing was enumerated")
        }
    }

    #[test]
    fn test_odrive_usb_ids() {
        assert!(is_odrive(0x1209, 0x0D32));
        assert!(is_odrive(0x1209, 0x0D31));
    }

    #[test]
    fn test_other_usb_ids() {
        // DFU bootloader, not the firmware CDC port
        assert!(!is_odrive(0x0483, 0xDF11));
        // Same VID, unrelated pid.codes product
        assert!(!is_odrive(0x1209, 0x0001));
    }

    #[test]
    fn test_candidates_skip_non_usb_ports() {
        let ports = vec![
            SerialPortInfo {
                port_name: "/dev/ttyS0".to_string(),
                port_type: SerialPortType::Unknown,
            },
            SerialPortInfo {
                port_name: "/dev/rfcomm0".to_string(),
                port_type: SerialPortType::BluetoothPort,
            },
        ];
        assert!(candidates(ports).is_empty());
    }

    #[test]
    fn test_no_candidate_times_out() {
        let ports = ScriptedPorts::new(u32::MAX, false);
        let timeout = Duration::from_millis(250);
        let started = Instant::now();

        match find_any(&ports, timeout) {
            Err(OdriveError::Timeout { timeout: reported }) => assert_eq!(reported, timeout),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(started.elapsed() >= timeout);
        // Kept polling until the deadline
        assert!(ports.polls.get() >= 2);
        assert_eq!(ports.opens.get(), 0);
    }

    #[test]
    fn test_open_failure_reported_at_deadline() {
        let ports = ScriptedPorts::new(1, true);

        match find_any(&ports, Duration::from_millis(250)) {
            Err(OdriveError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("expected the open error, got {:?}", other),
        }
        // Retried the port on later polls before giving up
        assert!(ports.opens.get() >= 2);
    }

    #[test]
    fn test_device_found_on_later_poll() {
        let ports = ScriptedPorts::new(3, false);

        let port = find_any(&ports, Duration::from_secs(5)).unwrap();
        assert_eq!(port, "/dev/ttyACM0");
        assert_eq!(ports.polls.get(), 3);
        assert_eq!(ports.opens.get(), 1);
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let ports = ScriptedPorts::new(2, false);

        let port = find_any(&ports, Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(port, "/dev/ttyACM0");
        assert_eq!(ports.polls.get(), 2);
    }

    #[test]
    fn test_enumeration_error_is_returned() {
        assert!(matches!(
            find_any(&BrokenEnumeration, Duration::from_secs(5)),
            Err(OdriveError::Serial(_))
        ));
    }
}
