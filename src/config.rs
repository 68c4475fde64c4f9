// Timeouts, USB identifiers, fixed diagnostic text
use std::time::Duration;

// How long find_any waits for an ODrive to show up
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

// Delay between two USB enumerations while discovering
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);

// USB identifiers (pid.codes VID shared by ODrive Robotics)
pub const ODRIVE_USB_VID: u16 = 0x1209;
// Current firmware PID first, legacy firmware PID second
pub const ODRIVE_USB_PIDS: [u16; 2] = [0x0D32, 0x0D31];

// CDC ACM ignores the baudrate, but serialport wants one
pub const SERIAL_BAUDRATE: u32 = 115_200;

// Per-request timeout for the ASCII protocol
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

// Property read by the diagnostic
pub const VBUS_PROPERTY: &str = "vbus_voltage";

// Printed after any discovery/read failure
pub const TROUBLESHOOTING: [&str; 4] = [
    "1. Check USB connection",
    "2. Check power to ODrive",
    "3. On Windows, check Device Manager for 'ODrive 3.6 Native Interface'",
    "4. Try: zadig.exe to install WinUSB driver",
];
