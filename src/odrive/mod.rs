// ODrive access over USB
//
// Provides:
// - ASCII protocol implementation (line based, optional checksum)
// - USB discovery of ODrive CDC ports (find_any with timeout)
// - Connected device handle for property and status reads

pub mod ascii;
mod device;
pub mod discovery;

pub use ascii::{AsciiProtocol, OdriveError};
pub use device::{ClearInput, Odrive};
pub use discovery::{find_any, is_odrive, probe, PortSource, UsbPorts};
