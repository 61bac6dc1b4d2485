// Protocol constants for the Surface EC serial link

/// Frame preamble, present on every request, response and acknowledgement
pub const PREAMBLE: [u8; 2] = [0xAA, 0x55];

/// Frame type byte of a request or response frame
pub const FRAME_TYPE_MESSAGE: u8 = 0x80;

/// Frame type byte of a plain acknowledgement
pub const FRAME_TYPE_ACK: u8 = 0x40;

/// Frame type byte of an acknowledgement asking for a retransmission
pub const FRAME_TYPE_NAK: u8 = 0x04;

/// Size of the frame header: preamble, type, length, reserved, seq and header CRC (8 bytes)
pub const HEADER_SIZE: usize = 8;

/// Size of a CRC field (2 bytes)
pub const CRC_SIZE: usize = 2;

/// Bytes a message frame adds around its payload (header + payload CRC)
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CRC_SIZE;

/// Size of an acknowledgement frame (10 bytes)
pub const ACK_FRAME_SIZE: usize = 0x0A;

/// Fixed trailer of an acknowledgement frame
pub const ACK_TRAILER: [u8; 2] = [0xFF, 0xFF];

/// Size of the addressing prefix at the start of every request/response payload
pub const COMMAND_PREFIX_SIZE: usize = 8;

/// First byte of a request/response payload
pub const COMMAND_PREFIX_MARKER: u8 = 0x80;

/// Marker of the unsolicited control frame the EC emits now and then
pub const CONTROL_FRAME_MARKER: [u8; 3] = [0x4E, 0x00, 0x53];

/// Size of the unsolicited control frame (25 bytes)
pub const CONTROL_FRAME_SIZE: usize = 0x19;

/// Chunk size for opportunistic reads from the link
pub const READ_CHUNK_SIZE: usize = 0x0400;

/// Default UART device the EC is wired to
pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";

/// Default UART baud rate
pub const DEFAULT_BAUD_RATE: u32 = 3_000_000;
