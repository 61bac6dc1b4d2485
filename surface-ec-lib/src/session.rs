//! One request/response exchange with the EC.
//!
//! The session owns a receive buffer on top of the byte stream so that bytes
//! read past the end of one frame are kept for the next stage. Every blocking
//! stage is bounded by [`SessionConfig::timeout`].
//!
//! ```text
//! Idle -> DrainingPre -> RequestSent -> AwaitingAck -> AwaitingResponse
//!      -> ResponseAcked -> DrainingPost -> Done
//!                      AwaitingAck -> Retrying -> AwaitingAck -> Aborted
//! ```

use crate::command::{Request, RequestDescriptor};
use crate::constants::{ACK_FRAME_SIZE, HEADER_SIZE, READ_CHUNK_SIZE};
use crate::counters::SequenceState;
use crate::decode::DecodedPayload;
use crate::error::ECError;
use crate::frame::{self, AckType, FrameKind, Response};
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::{debug, trace, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Longest wait for the bytes of one stage (ack, response, a partially drained frame).
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "draining stale frames")]
    DrainingPre,
    #[strum(to_string = "sending request")]
    RequestSent,
    #[strum(to_string = "waiting for acknowledgement")]
    AwaitingAck,
    #[strum(to_string = "retrying request")]
    Retrying,
    #[strum(to_string = "waiting for response")]
    AwaitingResponse,
    #[strum(to_string = "acknowledging response")]
    ResponseAcked,
    #[strum(to_string = "draining trailing frames")]
    DrainingPost,
    #[strum(to_string = "done")]
    Done,
    #[strum(to_string = "aborted")]
    Aborted,
}

/// What a drain pass threw away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub frames: usize,
    pub bytes: usize,
}

pub struct Session<'a, L: Read + Write> {
    link: &'a mut L,
    config: SessionConfig,
    state: SessionState,
    rx: BytesMut,
    retransmissions: usize,
}

impl<'a, L: Read + Write> Session<'a, L> {
    pub fn new(link: &'a mut L, config: SessionConfig) -> Self {
        Self {
            link,
            config,
            state: SessionState::Idle,
            rx: BytesMut::with_capacity(READ_CHUNK_SIZE),
            retransmissions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of times the request had to be sent again.
    pub fn retransmissions(&self) -> usize {
        self.retransmissions
    }

    /// Bytes read from the link but not consumed yet.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run `request` and decode its response.
    pub fn query(&mut self, request: &Request, counters: &mut SequenceState) -> Result<DecodedPayload, ECError> {
        let payload = self.exchange(&request.descriptor(), counters)?;
        request.decode(&payload)
    }

    /// Send one request and return the raw response payload.
    ///
    /// Once the EC has accepted the request its counters are spent, so
    /// `counters` advances even if reading the response fails afterwards. On
    /// [`ECError::AckRetryExhausted`] they are left untouched.
    pub fn exchange(&mut self, descriptor: &RequestDescriptor, counters: &mut SequenceState) -> Result<Bytes, ECError> {
        self.transition(SessionState::DrainingPre);
        self.drain()?;

        let request = frame::encode_request(descriptor, counters.seq, counters.cnt);
        self.transition(SessionState::RequestSent);
        self.write_frame(&request)?;

        self.transition(SessionState::AwaitingAck);
        if self.read_ack(counters.seq)? {
            self.transition(SessionState::Retrying);
            warn!(seq = counters.seq, "EC rejected request, sending it again");
            self.write_frame(&request)?;
            self.retransmissions += 1;

            self.transition(SessionState::AwaitingAck);
            if self.read_ack(counters.seq)? {
                self.transition(SessionState::Aborted);
                return Err(ECError::AckRetryExhausted);
            }
        }

        let result = self.complete(descriptor, counters.cnt);
        counters.advance();
        result
    }

    fn complete(&mut self, descriptor: &RequestDescriptor, cnt: u16) -> Result<Bytes, ECError> {
        self.transition(SessionState::AwaitingResponse);
        let response = self.read_response(descriptor, cnt)?;

        self.transition(SessionState::ResponseAcked);
        self.write_frame(&frame::encode_ack(response.seq))?;

        self.transition(SessionState::DrainingPost);
        self.drain()?;

        self.transition(SessionState::Done);
        Ok(response.payload)
    }

    /// Discard every complete frame waiting on the link.
    ///
    /// Acknowledgements, message frames and the EC's control frames are
    /// skipped by their shape; anything else means the stream position is
    /// lost and fails with [`ECError::ProtocolDesync`].
    pub fn drain(&mut self) -> Result<DrainReport, ECError> {
        let mut report = DrainReport::default();
        self.poll()?;

        while !self.rx.is_empty() {
            if self.rx.len() < HEADER_SIZE {
                self.fill(HEADER_SIZE, "draining a partial frame")?;
                continue;
            }

            let kind = FrameKind::classify(&self.rx)?;
            self.fill(kind.frame_len(), "draining a partial frame")?;
            let stale = self.rx.split_to(kind.frame_len());
            warn!(?kind, bytes = hex::encode(&stale), "Discarded stale frame");
            report.frames += 1;
            report.bytes += stale.len();

            self.poll()?;
        }

        Ok(report)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state");
        self.state = next;
    }

    fn write_frame(&mut self, data: &[u8]) -> Result<(), ECError> {
        debug!(bytes = hex::encode(data), "UART Write");
        self.link.write_all(data)?;
        self.link.flush()?;
        Ok(())
    }

    /// One read attempt. Returns how many bytes arrived, 0 if none did in time.
    fn poll(&mut self) -> Result<usize, ECError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        match self.link.read(&mut chunk) {
            Ok(n) => {
                if n > 0 {
                    trace!(bytes = hex::encode(&chunk[..n]), "UART Read");
                    self.rx.extend_from_slice(&chunk[..n]);
                }
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Keep reading until at least `want` bytes are buffered.
    fn fill(&mut self, want: usize, stage: &'static str) -> Result<(), ECError> {
        let started = Instant::now();
        while self.rx.len() < want {
            if self.poll()? == 0 && started.elapsed() >= self.config.timeout {
                return Err(ECError::Timeout {
                    stage,
                    waited: started.elapsed(),
                });
            }
        }
        Ok(())
    }

    /// Read one acknowledgement; returns whether the EC asked for a retry.
    fn read_ack(&mut self, expected_seq: u8) -> Result<bool, ECError> {
        self.fill(ACK_FRAME_SIZE, "waiting for acknowledgement")?;
        let data = self.rx.split_to(ACK_FRAME_SIZE);
        debug!(bytes = hex::encode(&data), "Received acknowledgement");

        let ack = frame::parse_ack(&data)?;
        match ack.ack_type {
            AckType::Ack if ack.seq != expected_seq => {
                return Err(ECError::AckSeqMismatch {
                    expected: expected_seq,
                    actual: ack.seq,
                });
            }
            AckType::Unknown(ty) => warn!(ack_type = ty, seq = ack.seq, "Unknown acknowledgement type, accepting"),
            _ => {}
        }
        Ok(ack.needs_retry())
    }

    fn read_response(&mut self, descriptor: &RequestDescriptor, cnt: u16) -> Result<Response, ECError> {
        self.fill(HEADER_SIZE, "waiting for response header")?;
        let header = frame::parse_response_header(&self.rx[..HEADER_SIZE])?;

        self.fill(header.frame_len(), "waiting for response payload")?;
        let data = self.rx.split_to(header.frame_len());
        debug!(bytes = hex::encode(&data), "Received response");

        frame::parse_response_body(&data, descriptor, cnt)
    }
}
