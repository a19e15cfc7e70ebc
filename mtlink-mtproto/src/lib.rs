//! Sans-IO MTProto 2.0.
//!
//! This crate handles:
//! * Message framing (sequence numbers, message IDs)
//! * Plaintext messages for the key exchange
//! * The key exchange itself, as a state machine ([`Authenticator`])
//! * The encrypted session that takes over once a key exists
//! * The Full transport codec with CRC-32
//!
//! It performs no I/O: bring your own TCP stream and feed bytes in and out.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod authentication;
pub mod authenticator;
pub mod encrypted;
pub mod message;
pub mod session;
pub mod transport;

pub use authentication::{ServerAuthentication, Error as AuthError};
pub use authenticator::{Authenticator, Entropy, Handshake, OsEntropy, Phase};
pub use encrypted::{DecryptError, DecryptedMessage, EncryptedSession};
pub use message::{Message, MessageId, plaintext_body};
pub use session::Session;
pub use transport::FullFramer;
