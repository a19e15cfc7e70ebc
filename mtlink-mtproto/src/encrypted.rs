//! Encrypted MTProto 2.0 session (post auth-key).
//!
//! Once a handshake yields a [`ServerAuthentication`], construct an
//! [`EncryptedSession`] from it and route every later message through
//! [`EncryptedSession::pack`] and [`EncryptedSession::unpack`].

use std::fmt;

use mtlink_crypto::{AuthKey, DequeBuffer, Side, decrypt_data_v2, encrypt_data_v2};
use mtlink_tl::{Blob, Serializable, functions};

use crate::authentication::ServerAuthentication;
use crate::message::{MessageId, random_bits, since_epoch};

/// `msg_id + seq_no + length`
const MESSAGE_HEADER_LEN: usize = 8 + 4 + 4;

/// Errors that can occur when decrypting a server message.
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// The key id on the wire belongs to a different auth key.
    KeyMismatch,
    /// The `msg_key` on the wire does not match the decrypted contents.
    MessageKeyMismatch,
    /// The ciphertext is too short or not block-aligned.
    InvalidBuffer,
    /// The decrypted inner message is too short to hold a header, or its
    /// declared length does not fit.
    FrameTooShort,
    /// The server used a salt other than ours.
    SaltMismatch {
        /// Salt in the message.
        got: i64,
        /// Salt we expected.
        expected: i64,
    },
    /// Session-ID mismatch (possible replay or wrong connection).
    SessionMismatch,
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
            Self::InvalidBuffer => write!(f, "invalid ciphertext length"),
            Self::FrameTooShort => write!(f, "inner plaintext too short"),
            Self::SaltMismatch { got, expected } => {
                write!(f, "server salt mismatch: got {got}, expected {expected}")
            }
            Self::SessionMismatch => write!(f, "session_id mismatch"),
        }
    }
}

impl std::error::Error for DecryptError {}

impl From<mtlink_crypto::DecryptError> for DecryptError {
    fn from(e: mtlink_crypto::DecryptError) -> Self {
        match e {
            mtlink_crypto::DecryptError::InvalidBuffer => Self::InvalidBuffer,
            mtlink_crypto::DecryptError::AuthKeyMismatch => Self::KeyMismatch,
            mtlink_crypto::DecryptError::MessageKeyMismatch => Self::MessageKeyMismatch,
        }
    }
}

/// The inner payload extracted from a successfully decrypted server frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedMessage {
    /// `salt` sent by the server.
    pub salt:       i64,
    /// The `session_id` from the frame.
    pub session_id: i64,
    /// The `msg_id` of the inner message.
    pub msg_id:     i64,
    /// `seq_no` of the inner message.
    pub seq_no:     i32,
    /// TL-serialized body of the inner message.
    pub body:       Vec<u8>,
}

/// MTProto 2.0 encrypted session state.
///
/// Wraps an `AuthKey` and tracks per-session counters (session_id, seq_no,
/// last_msg_id, server salt). Not meant to be shared between tasks without
/// a lock: every send mutates the counters.
pub struct EncryptedSession {
    auth_key:    AuthKey,
    time_offset: i32,
    salt:        i64,
    session_id:  i64,
    sequence:    i32,
    last_msg_id: i64,
}

impl fmt::Debug for EncryptedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSession")
            .field("auth_key", &self.auth_key)
            .field("session_id", &self.session_id)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl EncryptedSession {
    /// Start a session on a fresh connection.
    pub fn new(auth: ServerAuthentication) -> Result<Self, getrandom::Error> {
        let ServerAuthentication { auth_key, time_offset, first_salt } = auth;
        let mut session = Self {
            auth_key,
            time_offset,
            salt: first_salt,
            session_id: 0,
            sequence: 0,
            last_msg_id: 0,
        };
        session.reset()?;
        Ok(session)
    }

    /// Pick a new random session id and zero the counters. Call on every
    /// new connection.
    pub fn reset(&mut self) -> Result<(), getrandom::Error> {
        let mut rnd = [0u8; 8];
        getrandom::getrandom(&mut rnd)?;
        self.session_id = i64::from_le_bytes(rnd);
        self.sequence = 0;
        self.last_msg_id = 0;
        Ok(())
    }

    /// Next strictly increasing message id, on the server's clock.
    pub fn next_msg_id(&mut self) -> i64 {
        let candidate = MessageId::now(self.time_offset, random_bits());
        let id = MessageId::after(self.last_msg_id, candidate).0;
        self.last_msg_id = id;
        id
    }

    /// Next sequence number: odd and advancing for content-related
    /// messages, even and unchanged otherwise.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence.wrapping_mul(2).wrapping_add(1);
            self.sequence = self.sequence.wrapping_add(1);
            n
        } else {
            self.sequence.wrapping_mul(2)
        }
    }

    /// Assign an id and sequence number to `body` and lay it out as
    /// `msg_id || seq_no || length || body`.
    ///
    /// With `after_id` the body is first wrapped in `invokeAfterMsg` so the
    /// server runs it only after that message.
    pub fn wrap_message(
        &mut self,
        body: &[u8],
        content_related: bool,
        after_id: Option<i64>,
    ) -> (i64, Vec<u8>) {
        let body = match after_id {
            Some(msg_id) => functions::InvokeAfterMsg { msg_id, query: Blob(body.to_vec()) }.to_bytes(),
            None => body.to_vec(),
        };
        let msg_id = self.next_msg_id();
        let seq_no = self.next_seq_no(content_related);

        let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + body.len());
        buf.extend(msg_id.to_le_bytes());
        buf.extend(seq_no.to_le_bytes());
        buf.extend((body.len() as u32).to_le_bytes());
        buf.extend(body);
        (msg_id, buf)
    }

    /// Encrypt a wrapped message:
    ///
    /// ```text
    /// key_id:long  msg_key:int128  AES-IGE(salt:long session_id:long message padding)
    /// ```
    pub fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>, getrandom::Error> {
        // Front capacity = 24 for auth_key_id + msg_key
        let mut buf = DequeBuffer::with_capacity(16 + message.len() + 32, 24);
        buf.extend(self.salt.to_le_bytes());
        buf.extend(self.session_id.to_le_bytes());
        buf.extend(message.iter().copied());

        encrypt_data_v2(&mut buf, &self.auth_key)?;
        Ok(buf.to_vec())
    }

    /// Decrypt a server frame and check its salt and session id. Returns
    /// the padded inner message after `salt || session_id`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let (_, _, message) = self.open(ciphertext)?;
        Ok(message)
    }

    /// Serialize, wrap and encrypt a content-related request. Returns the
    /// wire bytes and the assigned `msg_id`.
    pub fn pack<S: Serializable>(&mut self, call: &S) -> Result<(Vec<u8>, i64), getrandom::Error> {
        let (msg_id, message) = self.wrap_message(&call.to_bytes(), true, None);
        Ok((self.encrypt(&message)?, msg_id))
    }

    /// Decrypt an encrypted server frame and split out its header.
    pub fn unpack(&self, ciphertext: &[u8]) -> Result<DecryptedMessage, DecryptError> {
        let (salt, session_id, message) = self.open(ciphertext)?;
        if message.len() < MESSAGE_HEADER_LEN {
            return Err(DecryptError::FrameTooShort);
        }

        let msg_id   = i64::from_le_bytes(message[..8].try_into().unwrap());
        let seq_no   = i32::from_le_bytes(message[8..12].try_into().unwrap());
        let body_len = u32::from_le_bytes(message[12..16].try_into().unwrap()) as usize;

        let body = message
            .get(MESSAGE_HEADER_LEN..MESSAGE_HEADER_LEN + body_len)
            .ok_or(DecryptError::FrameTooShort)?
            .to_vec();

        Ok(DecryptedMessage { salt, session_id, msg_id, seq_no, body })
    }

    fn open(&self, ciphertext: &[u8]) -> Result<(i64, i64, Vec<u8>), DecryptError> {
        let mut buf = ciphertext.to_vec();
        let plaintext = decrypt_data_v2(&mut buf, &self.auth_key, Side::Server)?;
        if plaintext.len() < 16 {
            return Err(DecryptError::FrameTooShort);
        }

        let salt       = i64::from_le_bytes(plaintext[..8].try_into().unwrap());
        let session_id = i64::from_le_bytes(plaintext[8..16].try_into().unwrap());

        if self.salt != 0 && salt != self.salt {
            return Err(DecryptError::SaltMismatch { got: salt, expected: self.salt });
        }
        if session_id != self.session_id {
            return Err(DecryptError::SessionMismatch);
        }
        Ok((salt, session_id, plaintext[16..].to_vec()))
    }

    /// Resynchronise the clock from a message id the server accepted or
    /// sent. If the offset moves, message ids restart from the new clock.
    pub fn update_time_offset(&mut self, correct_msg_id: i64) -> i32 {
        let now = since_epoch().as_secs() as i64;
        let offset = (MessageId(correct_msg_id).unix_secs() - now) as i32;
        if offset != self.time_offset {
            self.time_offset = offset;
            self.last_msg_id = 0;
        }
        self.time_offset
    }

    /// Adopt a new server salt.
    pub fn set_salt(&mut self, salt: i64) { self.salt = salt; }

    /// The salt used for outgoing messages.
    pub fn salt(&self) -> i64 { self.salt }

    /// The current session_id.
    pub fn session_id(&self) -> i64 { self.session_id }

    /// Clock skew in seconds against the server.
    pub fn time_offset(&self) -> i32 { self.time_offset }

    /// The auth key this session encrypts with.
    pub fn auth_key(&self) -> &AuthKey { &self.auth_key }
}
