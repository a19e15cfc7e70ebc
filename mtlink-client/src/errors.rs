//! Error types for mtlink-client.

use std::{fmt, io};

use mtlink_mtproto::{AuthError, DecryptError};

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error the server returned instead of a result.
///
/// Numeric suffixes are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code. Transport-level errors carry the negative
    /// code the server wrote in place of a frame.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw error message like `"FLOOD_WAIT_30"`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some((name, suffix)) = message.rsplit_once('_') {
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    return Self { code, name: name.to_string(), value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with an optional leading or trailing `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("AUTH_KEY_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned by every [`crate::Connection`] method.
#[derive(Debug)]
pub enum InvocationError {
    /// Network / I/O failure, including a closed or desynchronised stream.
    Io(io::Error),
    /// The key exchange failed.
    Handshake(AuthError),
    /// A server frame could not be decrypted or did not belong to this session.
    Decrypt(DecryptError),
    /// A reply body could not be parsed.
    Deserialize(String),
    /// The server did not answer in time.
    Timeout,
    /// The server answered with `rpc_error` or a transport error code.
    Rpc(RpcError),
    /// The server refused the message itself (`bad_msg_notification`).
    BadMessage {
        /// The notification's error code.
        code: i32,
    },
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)              => write!(f, "I/O error: {e}"),
            Self::Handshake(e)       => write!(f, "handshake failed: {e}"),
            Self::Decrypt(e)         => write!(f, "decrypt error: {e}"),
            Self::Deserialize(s)     => write!(f, "deserialize error: {s}"),
            Self::Timeout            => write!(f, "timed out"),
            Self::Rpc(e)             => write!(f, "{e}"),
            Self::BadMessage { code } => write!(f, "bad_msg_notification (code {code})"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e)        => Some(e),
            Self::Handshake(e) => Some(e),
            Self::Decrypt(e)   => Some(e),
            Self::Rpc(e)       => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<getrandom::Error> for InvocationError {
    fn from(e: getrandom::Error) -> Self { Self::Io(io::Error::other(e.to_string())) }
}

impl From<AuthError> for InvocationError {
    fn from(e: AuthError) -> Self { Self::Handshake(e) }
}

impl From<DecryptError> for InvocationError {
    fn from(e: DecryptError) -> Self { Self::Decrypt(e) }
}

impl From<mtlink_tl::deserialize::Error> for InvocationError {
    fn from(e: mtlink_tl::deserialize::Error) -> Self { Self::Deserialize(e.to_string()) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _ => false,
        }
    }
}
