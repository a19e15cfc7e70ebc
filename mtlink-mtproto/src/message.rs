//! MTProto message ids and the plaintext envelope.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A 64-bit MTProto message identifier.
///
/// The upper 32 bits are Unix seconds (server-corrected), followed by ten bits
/// of milliseconds and nineteen random bits. The two lowest bits are always
/// zero for client messages.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Compute an id for the instant `since_epoch`, shifted by `time_offset`
    /// seconds.
    pub fn at(since_epoch: Duration, time_offset: i32, random: u32) -> Self {
        let secs = (since_epoch.as_secs() as i64).wrapping_add(i64::from(time_offset));
        let millis = i64::from(since_epoch.subsec_millis());
        let random = i64::from(random & 0x7ffff);
        Self((secs << 32) | (millis << 22) | (random << 2))
    }

    /// Like [`MessageId::at`] using the system clock.
    pub fn now(time_offset: i32, random: u32) -> Self {
        Self::at(since_epoch(), time_offset, random)
    }

    /// The next id after `last`: `candidate` if it is strictly greater,
    /// otherwise `last + 4`.
    pub fn after(last: i64, candidate: Self) -> Self {
        if candidate.0 > last { candidate } else { Self(last + 4) }
    }

    /// The whole seconds encoded in this id.
    pub fn unix_secs(self) -> i64 {
        self.0 >> 32
    }
}

pub(crate) fn since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// 19 random bits for a message id. Falls back to zero if the OS source
/// fails; the monotonic bump in [`MessageId::after`] still keeps ids unique.
pub(crate) fn random_bits() -> u32 {
    let mut buf = [0u8; 4];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u32::from_le_bytes(buf),
        Err(e) => {
            log::warn!("[mtlink] getrandom failed for msg_id bits: {e}");
            0
        }
    }
}

/// A message ready to be sent before an auth key exists.
#[derive(Debug)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Session-scoped sequence number (even for content-unrelated, odd for content-related).
    pub seq_no: i32,
    /// The serialized TL body (constructor id + fields).
    pub body: Vec<u8>,
}

impl Message {
    /// Construct a new plaintext message.
    pub fn plaintext(id: MessageId, seq_no: i32, body: Vec<u8>) -> Self {
        Self { id, seq_no, body }
    }

    /// Serialize into the plaintext wire format:
    ///
    /// ```text
    /// auth_key_id:long  (0 for plaintext)
    /// message_id:long
    /// message_data_length:int
    /// message_data:bytes
    /// ```
    pub fn to_plaintext_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + self.body.len());
        buf.extend(0i64.to_le_bytes());
        buf.extend(self.id.0.to_le_bytes());
        buf.extend((self.body.len() as u32).to_le_bytes());
        buf.extend(&self.body);
        buf
    }
}

/// Errors from [`plaintext_body`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaintextError {
    TooShort { len: usize },
    /// The message carries an auth key id, so it is not plaintext.
    NonZeroAuthKeyId { id: i64 },
    /// The declared body length does not match the bytes received.
    LengthMismatch { declared: usize, actual: usize },
}

impl fmt::Display for PlaintextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "plaintext message too short ({len} bytes)"),
            Self::NonZeroAuthKeyId { id } => write!(f, "expected auth_key_id 0, got {id}"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared body length {declared}, received {actual}")
            }
        }
    }
}

impl std::error::Error for PlaintextError {}

/// Validate a plaintext server message and return its body.
pub fn plaintext_body(message: &[u8]) -> Result<&[u8], PlaintextError> {
    if message.len() < 20 {
        return Err(PlaintextError::TooShort { len: message.len() });
    }
    let auth_key_id = i64::from_le_bytes(message[..8].try_into().unwrap());
    if auth_key_id != 0 {
        return Err(PlaintextError::NonZeroAuthKeyId { id: auth_key_id });
    }
    let declared = u32::from_le_bytes(message[16..20].try_into().unwrap()) as usize;
    let body = &message[20..];
    if declared != body.len() {
        return Err(PlaintextError::LengthMismatch { declared, actual: body.len() });
    }
    Ok(body)
}
