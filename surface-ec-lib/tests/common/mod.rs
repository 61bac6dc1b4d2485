//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use surface_ec_lib::constants::*;
#[allow(unused_imports)]
pub use surface_ec_lib::error::{ECError, FrameSection};
#[allow(unused_imports)]
pub use surface_ec_lib::frame::{self, AckType};
#[allow(unused_imports)]
pub use surface_ec_lib::{Request, RequestDescriptor, SequenceState, Session, SessionConfig, SessionState};

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Session config with a short timeout so failing reads do not stall the suite
#[allow(dead_code)]
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(20),
    }
}

/// In-memory serial link. Bytes given to [`ScriptedLink::with_pending`] are
/// readable right away; each scripted reply becomes readable once the host
/// has written one more frame, the way the EC answers a request.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
}

#[allow(dead_code)]
impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending(mut self, bytes: &[u8]) -> Self {
        self.rx.extend(bytes);
        self
    }

    pub fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Bytes still waiting to be read by the host
    pub fn unread(&self) -> usize {
        self.rx.len()
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Concatenate frames into one byte stream
#[allow(dead_code)]
pub fn stream(frames: &[&[u8]]) -> Vec<u8> {
    frames.concat()
}

/// An unsolicited control frame as the EC emits it
#[allow(dead_code)]
pub fn control_frame() -> Vec<u8> {
    let mut frame = vec![0u8; CONTROL_FRAME_SIZE];
    frame[..3].copy_from_slice(&CONTROL_FRAME_MARKER);
    frame
}

/// `_BST` payload with the given state, rate, remaining capacity and voltage
#[allow(dead_code)]
pub fn bst_payload(state: u32, rate: u32, remaining: u32, voltage: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16);
    for value in [state, rate, remaining, voltage] {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload
}

/// `_BIX` payload as a Surface Book 2 battery reports it
#[allow(dead_code)]
pub fn bix_payload(design_capacity: u32, last_full: u32, cycle_count: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 119];
    payload[0] = 0x00; // revision
    let ints: [(usize, u32); 15] = [
        (1, 0),                 // power unit: mW/mWh
        (5, design_capacity),
        (9, last_full),
        (13, 1),                // present
        (17, 7_660),            // design voltage
        (21, design_capacity / 10),
        (25, design_capacity / 20),
        (29, cycle_count),
        (33, 50_000),
        (37, 0xFFFF_FFFF),
        (41, 0xFFFF_FFFF),
        (45, 0x3E8),
        (49, 0x3E8),
        (53, 0x0A),
        (57, 0x0A),
    ];
    for (offset, value) in ints {
        payload[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    put_text(&mut payload, 61, 20, "DYN01");
    put_text(&mut payload, 82, 10, "0123456789");
    put_text(&mut payload, 93, 4, "LION");
    put_text(&mut payload, 98, 20, "SMP-SDI2");
    payload
}

#[allow(dead_code)]
fn put_text(payload: &mut [u8], offset: usize, width: usize, text: &str) {
    let bytes = text.as_bytes();
    assert!(bytes.len() <= width);
    payload[offset..offset + bytes.len()].copy_from_slice(bytes);
}
