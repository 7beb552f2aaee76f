//! Envelope and payload definitions.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ProtocolError, Result, HEADER_LEN, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// Per-connection transaction identifier.
pub type TransactionId = u64;

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Master asks a worker to fetch a URL.
    TaskRequest = 1,
    /// Worker returns the outcome of a fetch.
    TaskResult = 2,
}

impl MessageKind {
    /// Parse a message kind from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageKind::TaskRequest),
            2 => Ok(MessageKind::TaskResult),
            _ => Err(ProtocolError::UnknownKind(b)),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::TaskRequest => write!(f, "task_request"),
            MessageKind::TaskResult => write!(f, "task_result"),
        }
    }
}

/// Request for a worker to fetch a URL on the master's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// The URL to fetch.
    pub target_url: String,
}

impl TaskRequest {
    /// Create a task request for a URL.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        let url = self.target_url.as_bytes();
        buf.put_u32(url.len() as u32);
        buf.put_slice(url);
    }

    fn decode_body(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(ProtocolError::Malformed("truncated url length".into()));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::Malformed("truncated url".into()));
        }
        let target_url = String::from_utf8(buf[..len].to_vec())
            .map_err(|e| ProtocolError::Malformed(format!("invalid url: {}", e)))?;
        buf.advance(len);
        ensure_consumed(buf)?;

        Ok(TaskRequest { target_url })
    }
}

/// Outcome of a fetch performed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    /// The fetched body, or the reason the fetch failed.
    pub outcome: std::result::Result<Bytes, String>,
}

impl TaskResult {
    const STATUS_OK: u8 = 0;
    const STATUS_FAILED: u8 = 1;

    /// A successful fetch.
    pub fn success(body: impl Into<Bytes>) -> Self {
        Self {
            outcome: Ok(body.into()),
        }
    }

    /// A failed fetch.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(reason.into()),
        }
    }

    /// Returns true if the fetch succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        let (status, data): (u8, &[u8]) = match &self.outcome {
            Ok(body) => (Self::STATUS_OK, &body[..]),
            Err(reason) => (Self::STATUS_FAILED, reason.as_bytes()),
        };
        buf.put_u8(status);
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    fn decode_body(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 5 {
            return Err(ProtocolError::Malformed("truncated result header".into()));
        }
        let status = buf.get_u8();
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::Malformed("truncated result data".into()));
        }
        let data = &buf[..len];
        let outcome = match status {
            Self::STATUS_OK => Ok(Bytes::copy_from_slice(data)),
            Self::STATUS_FAILED => Err(String::from_utf8_lossy(data).into_owned()),
            s => {
                return Err(ProtocolError::Malformed(format!(
                    "invalid result status: {}",
                    s
                )))
            }
        };
        buf.advance(len);
        ensure_consumed(buf)?;

        Ok(TaskResult { outcome })
    }
}

/// The body of an envelope.
///
/// A closed set: anything that is not one of these variants is rejected at
/// decode time, and callers match exhaustively on the kind they expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Master to worker.
    TaskRequest(TaskRequest),
    /// Worker to master.
    TaskResult(TaskResult),
}

impl Payload {
    /// The discriminator for this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::TaskRequest(_) => MessageKind::TaskRequest,
            Payload::TaskResult(_) => MessageKind::TaskResult,
        }
    }
}

/// A framed message: transaction ID plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlates a task result with the request that caused it.
    pub transaction_id: TransactionId,
    /// The message body.
    pub payload: Payload,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(transaction_id: TransactionId, payload: Payload) -> Self {
        Self {
            transaction_id,
            payload,
        }
    }

    /// The message kind carried by this envelope.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Encode the envelope into a single frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.kind() as u8);
        buf.put_u64(self.transaction_id);

        match &self.payload {
            Payload::TaskRequest(m) => m.encode_body(&mut buf),
            Payload::TaskResult(m) => m.encode_body(&mut buf),
        }

        buf.freeze()
    }

    /// Decode a frame using the default size limit.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with_limit(data, MAX_FRAME_SIZE)
    }

    /// Decode a frame, rejecting anything larger than `max_size` bytes.
    pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Malformed("frame too short".into()));
        }

        let mut buf = data;
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = MessageKind::from_byte(buf.get_u8())?;
        let transaction_id = buf.get_u64();

        let payload = match kind {
            MessageKind::TaskRequest => Payload::TaskRequest(TaskRequest::decode_body(buf)?),
            MessageKind::TaskResult => Payload::TaskResult(TaskResult::decode_body(buf)?),
        };

        Ok(Envelope {
            transaction_id,
            payload,
        })
    }
}

fn ensure_consumed(buf: &[u8]) -> Result<()> {
    if buf.has_remaining() {
        return Err(ProtocolError::Malformed(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}
