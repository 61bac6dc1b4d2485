use std::io;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

/// Which part of a frame a checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FrameSection {
    #[strum(to_string = "header")]
    Header,
    #[strum(to_string = "payload")]
    Payload,
}

/// The primary error type for the `surface-ec-lib` library.
#[derive(Error, Debug)]
pub enum ECError {
    #[error("Frame sync lost: expected {}, found {}", hex::encode(.expected), hex::encode(.found))]
    FrameSync { expected: Vec<u8>, found: Vec<u8> },

    #[error("Checksum mismatch in frame {section}: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        section: FrameSection,
        expected: u16,
        actual: u16,
    },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error(
        "Unexpected response target: expected {}, got {}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    UnexpectedResponseTarget { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Acknowledgement sequence mismatch: expected {expected:#04x}, got {actual:#04x}")]
    AckSeqMismatch { expected: u8, actual: u8 },

    #[error("Protocol desync: unknown frame starting with {}", hex::encode(.marker))]
    ProtocolDesync { marker: Vec<u8> },

    #[error("Payload too short for field '{field}': need {needed} bytes, got {actual}")]
    OutOfRange {
        field: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Unknown battery state code {0:#x}")]
    UnknownStateCode(u64),

    #[error("Acknowledgement retry exhausted, the EC did not accept the request")]
    AckRetryExhausted,

    #[error("Timeout after {waited:?} while {stage}")]
    Timeout { stage: &'static str, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Counter state error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ECError {
    /// Whether the session ended cleanly without a result rather than failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ECError::AckRetryExhausted)
    }
}
