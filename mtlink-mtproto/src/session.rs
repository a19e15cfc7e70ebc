//! Plaintext session state used before an auth key exists.

use mtlink_tl::Serializable;

use crate::message::{Message, MessageId, random_bits};

/// Message ids and sequence numbers for unencrypted handshake messages.
///
/// A `Session` is cheap to create; make a new one per connection.
///
/// # Example
///
/// ```rust
/// use mtlink_mtproto::Session;
/// use mtlink_tl::functions;
///
/// let mut session = Session::new();
/// let msg = session.pack(&functions::ReqPqMulti { nonce: [0; 16] });
/// assert_eq!(msg.to_plaintext_bytes().len(), 20 + 20);
/// ```
#[derive(Debug, Default)]
pub struct Session {
    last_msg_id: i64,
    sequence: i32,
}

impl Session {
    /// Create a fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new, strictly increasing message id.
    pub fn next_msg_id(&mut self) -> MessageId {
        let id = MessageId::after(self.last_msg_id, MessageId::now(0, random_bits()));
        self.last_msg_id = id.0;
        id
    }

    /// Sequence number for the next message. Content-related messages get
    /// an odd number and advance the counter; others get an even number.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence.wrapping_mul(2).wrapping_add(1);
            self.sequence = self.sequence.wrapping_add(1);
            n
        } else {
            self.sequence.wrapping_mul(2)
        }
    }

    /// Serialize `call` into a [`Message`] ready to send.
    ///
    /// Handshake requests are not content-related: the server does not
    /// acknowledge plaintext messages.
    pub fn pack<S: Serializable>(&mut self, call: &S) -> Message {
        let id = self.next_msg_id();
        let seq_no = self.next_seq_no(false);
        Message::plaintext(id, seq_no, call.to_bytes())
    }
}
