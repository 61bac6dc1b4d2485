//! # Surface EC serial frames
//!
//! Every frame on the link starts with the `0xAA 0x55` preamble followed by a
//! 4-byte header and its CRC. Two shapes carry meaning for a request:
//!
//! - **Message** (request or response): `AA 55 | 80 | len | 00 | seq | crc(2) | payload(len) | crc(2)`
//! - **Acknowledgement**: `AA 55 | type | 00 | 00 | seq | crc(2) | FF FF`
//!
//! Both checksums are CRC-16/CCITT-FALSE, stored little-endian. The header CRC
//! covers the 4 bytes between the preamble and the CRC itself, the payload CRC
//! covers the payload.
//!
//! A third shape, an unsolicited 25-byte control frame starting with
//! `4E 00 53`, shows up on the wire but is never interpreted; [`FrameKind`]
//! only exists so the session can skip over it.

use crate::command::RequestDescriptor;
use crate::constants::*;
use crate::error::{ECError, FrameSection};
use bytes::{BufMut, Bytes, BytesMut};
use crc::{CRC_16_IBM_3740, Crc};
use num_enum::{FromPrimitive, IntoPrimitive};

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no xorout).
const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the frame checksum of `bytes`, in wire (little-endian) order.
pub fn crc16(bytes: &[u8]) -> [u8; 2] {
    CCITT_FALSE.checksum(bytes).to_le_bytes()
}

fn verify_crc(section: FrameSection, covered: &[u8], stored: &[u8]) -> Result<(), ECError> {
    let expected = u16::from_le_bytes(crc16(covered));
    let actual = u16::from_le_bytes([stored[0], stored[1]]);
    if expected != actual {
        return Err(ECError::ChecksumMismatch {
            section,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_preamble(bytes: &[u8], expected: &[u8]) -> Result<(), ECError> {
    if bytes.len() < expected.len() || &bytes[..expected.len()] != expected {
        return Err(ECError::FrameSync {
            expected: expected.to_vec(),
            found: bytes[..bytes.len().min(expected.len())].to_vec(),
        });
    }
    Ok(())
}

/// Frame type byte carried by an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum AckType {
    /// The EC accepted the frame with the given `seq`.
    Ack = 0x40,
    /// The EC could not take the frame and wants it sent again.
    Nak = 0x04,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// A parsed acknowledgement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub ack_type: AckType,
    pub seq: u8,
}

impl AckFrame {
    pub fn needs_retry(&self) -> bool {
        self.ack_type == AckType::Nak
    }
}

/// The part of a response frame known once its 8-byte header is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub payload_len: usize,
    pub seq: u8,
}

impl ResponseHeader {
    /// Total size of the frame on the wire, header and payload CRC included.
    pub fn frame_len(&self) -> usize {
        self.payload_len + FRAME_OVERHEAD
    }
}

/// A validated response with the addressing prefix stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq: u8,
    pub payload: Bytes,
}

/// Frame shapes that may sit in the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ack,
    Message { payload_len: usize },
    Control,
}

impl FrameKind {
    /// Identify the frame at the start of `bytes` by its first three bytes.
    ///
    /// Needs at least [`HEADER_SIZE`] bytes so a message frame's length is known.
    pub fn classify(bytes: &[u8]) -> Result<Self, ECError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ECError::InvalidFrame(format!(
                "need {} bytes to classify a frame, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        match [bytes[0], bytes[1], bytes[2]] {
            [0xAA, 0x55, FRAME_TYPE_ACK] => Ok(FrameKind::Ack),
            [0xAA, 0x55, FRAME_TYPE_MESSAGE] => Ok(FrameKind::Message {
                payload_len: bytes[3] as usize,
            }),
            CONTROL_FRAME_MARKER => Ok(FrameKind::Control),
            marker => Err(ECError::ProtocolDesync {
                marker: marker.to_vec(),
            }),
        }
    }

    pub fn frame_len(&self) -> usize {
        match self {
            FrameKind::Ack => ACK_FRAME_SIZE,
            FrameKind::Message { payload_len } => payload_len + FRAME_OVERHEAD,
            FrameKind::Control => CONTROL_FRAME_SIZE,
        }
    }
}

fn put_frame(out: &mut BytesMut, header: [u8; 4]) {
    out.extend_from_slice(&PREAMBLE);
    out.extend_from_slice(&header);
    out.extend_from_slice(&crc16(&header));
}

/// The 8-byte command payload of a request.
pub fn request_payload(descriptor: &RequestDescriptor, cnt: u16) -> [u8; COMMAND_PREFIX_SIZE] {
    let [cnt_lo, cnt_hi] = cnt.to_le_bytes();
    [
        COMMAND_PREFIX_MARKER,
        descriptor.target_class,
        0x01,
        0x00,
        descriptor.instance_id,
        cnt_lo,
        cnt_hi,
        descriptor.command_id,
    ]
}

/// The prefix a response to `descriptor` must echo back. The two direction
/// bytes are swapped compared to the request.
pub fn response_prefix(descriptor: &RequestDescriptor, cnt: u16) -> [u8; COMMAND_PREFIX_SIZE] {
    let [cnt_lo, cnt_hi] = cnt.to_le_bytes();
    [
        COMMAND_PREFIX_MARKER,
        descriptor.target_class,
        0x00,
        0x01,
        descriptor.instance_id,
        cnt_lo,
        cnt_hi,
        descriptor.command_id,
    ]
}

/// Build the request frame for `descriptor` under the given counters.
pub fn encode_request(descriptor: &RequestDescriptor, seq: u8, cnt: u16) -> Bytes {
    let payload = request_payload(descriptor, cnt);
    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    put_frame(&mut frame, [FRAME_TYPE_MESSAGE, payload.len() as u8, 0x00, seq]);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc16(&payload));
    frame.freeze()
}

/// Build the acknowledgement for a received frame with sequence number `seq`.
pub fn encode_ack(seq: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(ACK_FRAME_SIZE);
    put_frame(&mut frame, [FRAME_TYPE_ACK, 0x00, 0x00, seq]);
    frame.put_slice(&ACK_TRAILER);
    frame.freeze()
}

/// Parse a 10-byte acknowledgement frame.
///
/// Only the frame itself is checked here; whether a plain ack carries the
/// expected `seq` is up to the session.
pub fn parse_ack(bytes: &[u8]) -> Result<AckFrame, ECError> {
    check_preamble(bytes, &PREAMBLE)?;
    if bytes.len() != ACK_FRAME_SIZE {
        return Err(ECError::InvalidFrame(format!(
            "acknowledgement must be {} bytes, got {}",
            ACK_FRAME_SIZE,
            bytes.len()
        )));
    }
    if bytes[3..5] != [0x00, 0x00] {
        return Err(ECError::InvalidFrame(format!(
            "acknowledgement reserved bytes not zero: {}",
            hex::encode(&bytes[3..5])
        )));
    }
    verify_crc(FrameSection::Header, &bytes[2..6], &bytes[6..8])?;
    if bytes[8..] != ACK_TRAILER {
        return Err(ECError::InvalidFrame(format!(
            "acknowledgement trailer is {}, expected ffff",
            hex::encode(&bytes[8..])
        )));
    }

    Ok(AckFrame {
        ack_type: AckType::from_primitive(bytes[2]),
        seq: bytes[5],
    })
}

/// Validate the 8-byte header of a response frame.
pub fn parse_response_header(bytes: &[u8]) -> Result<ResponseHeader, ECError> {
    check_preamble(bytes, &[PREAMBLE[0], PREAMBLE[1], FRAME_TYPE_MESSAGE])?;
    if bytes.len() < HEADER_SIZE {
        return Err(ECError::InvalidFrame(format!(
            "response header must be {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    verify_crc(FrameSection::Header, &bytes[2..6], &bytes[6..8])?;

    Ok(ResponseHeader {
        payload_len: bytes[3] as usize,
        seq: bytes[5],
    })
}

/// Validate a complete response frame against the request it answers.
///
/// `frame` holds the whole frame, header included. The returned payload has the
/// echoed addressing prefix removed.
pub fn parse_response_body(frame: &[u8], descriptor: &RequestDescriptor, cnt: u16) -> Result<Response, ECError> {
    let header = parse_response_header(frame)?;
    if frame.len() != header.frame_len() {
        return Err(ECError::InvalidFrame(format!(
            "response frame should be {} bytes, got {}",
            header.frame_len(),
            frame.len()
        )));
    }
    if header.payload_len < COMMAND_PREFIX_SIZE {
        return Err(ECError::InvalidFrame(format!(
            "response payload of {} bytes cannot hold the command prefix",
            header.payload_len
        )));
    }

    let (payload, crc) = frame[HEADER_SIZE..].split_at(header.payload_len);
    verify_crc(FrameSection::Payload, payload, crc)?;

    let expected = response_prefix(descriptor, cnt);
    if payload[..COMMAND_PREFIX_SIZE] != expected {
        return Err(ECError::UnexpectedResponseTarget {
            expected: expected.to_vec(),
            actual: payload[..COMMAND_PREFIX_SIZE].to_vec(),
        });
    }

    Ok(Response {
        seq: header.seq,
        payload: Bytes::copy_from_slice(&payload[COMMAND_PREFIX_SIZE..]),
    })
}

/// Build a response frame as the EC would send it. Used to script the link in tests.
#[doc(hidden)]
pub fn encode_response(descriptor: &RequestDescriptor, seq: u8, cnt: u16, data: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(COMMAND_PREFIX_SIZE + data.len());
    payload.extend_from_slice(&response_prefix(descriptor, cnt));
    payload.extend_from_slice(data);

    let mut frame = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    put_frame(&mut frame, [FRAME_TYPE_MESSAGE, payload.len() as u8, 0x00, seq]);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc16(&payload));
    frame.freeze()
}

/// Build an acknowledgement of arbitrary type, as the EC would send it.
#[doc(hidden)]
pub fn encode_ack_with_type(ack_type: AckType, seq: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(ACK_FRAME_SIZE);
    put_frame(&mut frame, [ack_type.into(), 0x00, 0x00, seq]);
    frame.put_slice(&ACK_TRAILER);
    frame.freeze()
}
