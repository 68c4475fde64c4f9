// ODrive ASCII protocol implementation
//
// Line based, one request -> one reply line:
//   request:  "r <property>[*<checksum>]\n"
//   reply:    "<value>[*<checksum>]\r\n"
// checksum = XOR of every byte before '*', written in decimal

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Replies longer than this are treated as garbage on the line
const MAX_LINE_LEN: usize = 256;

/// Replies the firmware sends instead of a value
const REJECTIONS: [&str; 3] = ["invalid property", "invalid command format", "unknown command"];

/// Error types for ODrive communication
#[derive(Debug, thiserror::Error)]
pub enum OdriveError {
    #[error("USB serial backend unavailable: {0}")]
    Unavailable(#[source] serialport::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {} seconds while waiting for an ODrive", .timeout.as_secs_f32())]
    Timeout { timeout: Duration },

    #[error("No reply from ODrive while reading '{property}'")]
    NoResponse { property: String },

    #[error("ODrive rejected '{property}': {reply}")]
    Rejected { property: String, reply: String },

    #[error("Invalid reply for '{property}': {reason}")]
    InvalidResponse { property: String, reason: String },

    #[error("Checksum mismatch in reply for '{property}'")]
    ChecksumMismatch { property: String },
}

pub type Result<T> = std::result::Result<T, OdriveError>;

/// ASCII protocol session over any byte stream (normally the ODrive CDC port)
pub struct AsciiProtocol<T> {
    port: T,
    checksum: bool,
}

impl<T: Read + Write> AsciiProtocol<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            checksum: false,
        }
    }

    /// Append a line checksum to every request
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    #[cfg(test)]
    pub(crate) fn port(&self) -> &T {
        &self.port
    }

    /// XOR of all bytes
    fn line_checksum(data: &[u8]) -> u8 {
        data.iter().fold(0, |acc, &b| acc ^ b)
    }

    /// Build a request line, with checksum if enabled
    fn build_request(&self, command: &str) -> Vec<u8> {
        let mut line = command.as_bytes().to_vec();
        if self.checksum {
            let sum = Self::line_checksum(&line);
            line.extend_from_slice(format!("*{}", sum).as_bytes());
        }
        line.push(b'\n');
        line
    }

    fn send_line(&mut self, line: &[u8]) -> Result<()> {
        self.port.write_all(line)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one non-empty reply line, without its line ending
    fn read_line(&mut self, property: &str) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(0) => {
                    return Err(OdriveError::NoResponse {
                        property: property.to_string(),
                    });
                }
                Ok(_) => match byte[0] {
                    b'\n' => {
                        // Blank lines show up between replies on some firmware
                        if !line.is_empty() {
                            break;
                        }
                    }
                    b'\r' => {}
                    b => {
                        if line.len() >= MAX_LINE_LEN {
                            return Err(OdriveError::InvalidResponse {
                                property: property.to_string(),
                                reason: format!("reply longer than {} bytes", MAX_LINE_LEN),
                            });
                        }
                        line.push(b);
                    }
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(OdriveError::NoResponse {
                        property: property.to_string(),
                    });
                }
                Err(e) => return Err(OdriveError::Io(e)),
            }
        }

        String::from_utf8(line).map_err(|_| OdriveError::InvalidResponse {
            property: property.to_string(),
            reason: "reply is not valid UTF-8".to_string(),
        })
    }

    /// Strip and check a trailing "*<checksum>", if the reply carries one
    fn verify_checksum<'a>(property: &str, reply: &'a str) -> Result<&'a str> {
        let Some((body, sum)) = reply.rsplit_once('*') else {
            return Ok(reply);
        };

        let expected: u8 = sum.trim().parse().map_err(|_| OdriveError::InvalidResponse {
            property: property.to_string(),
            reason: format!("bad checksum field '{}'", sum),
        })?;

        if Self::line_checksum(body.as_bytes()) != expected {
            return Err(OdriveError::ChecksumMismatch {
                property: property.to_string(),
            });
        }
        Ok(body)
    }

    /// Read a property as raw text, e.g. `read_property("vbus_voltage")`
    pub fn read_property(&mut self, property: &str) -> Result<String> {
        let request = self.build_request(&format!("r {}", property));
        debug!("ASCII tx: {:?}", String::from_utf8_lossy(&request));
        self.send_line(&request)?;

        let reply = self.read_line(property)?;
        debug!("ASCII rx: {:?}", reply);

        let value = Self::verify_checksum(property, &reply)?.trim();
        if REJECTIONS.contains(&value) {
            return Err(OdriveError::Rejected {
                property: property.to_string(),
                reply: value.to_string(),
            });
        }
        Ok(value.to_string())
    }

    /// Read a numeric property, keeping the exact value the firmware printed
    pub fn read_f64(&mut self, property: &str) -> Result<f64> {
        let text = self.read_property(property)?;
        let value: f64 = text.parse().map_err(|_| OdriveError::InvalidResponse {
            property: property.to_string(),
            reason: format!("expected a number, got '{}'", text),
        })?;

        // NaN/inf would not survive the JSON status line
        if !value.is_finite() {
            return Err(OdriveError::InvalidResponse {
                property: property.to_string(),
                reason: format!("non-finite value '{}'", text),
            });
        }
        Ok(value)
    }
}
