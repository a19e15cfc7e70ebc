//! Cryptographic core for MTProto.
//!
//! Provides:
//! - a table-driven AES block engine and AES-256-IGE on top of it
//! - SHA-1 / SHA-256 hash macros
//! - PQ factorization (Fermat search with a Pollard-rho fallback)
//! - RSA_PAD and the server key ring
//! - `AuthKey`, the 256-byte shared secret
//! - nonce and message-key derivation of IGE key material
//! - MTProto 2.0 message encryption / decryption

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod deque_buffer;
mod factorize;
pub mod ige;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use deque_buffer::DequeBuffer;
pub use factorize::factorize;

use std::fmt;

/// A 32-byte AES key and 32-byte IGE IV.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKeyMaterial {
    pub key: [u8; 32],
    pub iv: [u8; 32],
}

impl fmt::Debug for CipherKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKeyMaterial(..)")
    }
}

/// Errors from [`decrypt_data_v2`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}

impl std::error::Error for DecryptError {}

/// Which peer produced a message. Selects the auth key window used for key
/// derivation, so client traffic can't be reflected back as server traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Derive the IGE key and IV for one message from the auth key and its
/// 16-byte `msg_key`.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> CipherKeyMaterial {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&sha_a[..8]);
    key[8..24].copy_from_slice(&sha_b[8..24]);
    key[24..].copy_from_slice(&sha_a[24..]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&sha_b[..8]);
    iv[8..24].copy_from_slice(&sha_a[8..24]);
    iv[24..].copy_from_slice(&sha_b[24..]);

    CipherKeyMaterial { key, iv }
}

/// `msg_key`: the middle 16 bytes of SHA-256 over a 32-byte auth key window
/// and the padded plaintext.
pub fn calc_msg_key(auth_key: &AuthKey, padded_plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..88 + x + 32], padded_plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// Random padding for a plaintext of `len` bytes: 17 to 32 bytes, ending on
/// a block boundary.
fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt `buffer` in place using MTProto 2.0, as the client.
///
/// After this call `buffer` contains `key_id || msg_key || ciphertext`.
pub fn encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey) -> Result<(), getrandom::Error> {
    encrypt_data_v2_as(buffer, auth_key, Side::Client)
}

/// Like [`encrypt_data_v2`] for either peer. Servers (and test doubles of
/// them) pass [`Side::Server`].
pub fn encrypt_data_v2_as(
    buffer: &mut DequeBuffer,
    auth_key: &AuthKey,
    side: Side,
) -> Result<(), getrandom::Error> {
    let mut rnd = [0u8; 32];
    getrandom::getrandom(&mut rnd)?;
    do_encrypt_data_v2(buffer, auth_key, side, &rnd);
    Ok(())
}

pub(crate) fn do_encrypt_data_v2(buffer: &mut DequeBuffer, auth_key: &AuthKey, side: Side, rnd: &[u8; 32]) {
    let pad = padding_len(buffer.len());
    buffer.extend(rnd.iter().take(pad).copied());

    let msg_key = calc_msg_key(auth_key, buffer.as_ref(), side);
    let CipherKeyMaterial { key, iv } = calc_key(auth_key, &msg_key, side);
    ige::encrypt_in_place(buffer.as_mut(), &key, &iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id());
}

/// Decrypt an MTProto 2.0 ciphertext sent by `side`.
///
/// `buffer` must start with `key_id || msg_key || ciphertext`. On success the
/// returned slice of `buffer` holds the padded plaintext.
pub fn decrypt_data_v2<'a>(
    buffer: &'a mut [u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<&'a mut [u8], DecryptError> {
    if buffer.len() < 24 || (buffer.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id() != buffer[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&buffer[8..24]);

    let CipherKeyMaterial { key, iv } = calc_key(auth_key, &msg_key, side);
    ige::decrypt_in_place(&mut buffer[24..], &key, &iv);

    if calc_msg_key(auth_key, &buffer[24..], side) != msg_key {
        return Err(DecryptError::MessageKeyMismatch);
    }
    Ok(&mut buffer[24..])
}

/// Derive the temporary key and IV that protect `server_DH_inner_data` and
/// `client_DH_inner_data`.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> CipherKeyMaterial {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    CipherKeyMaterial { key, iv }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AuthKey {
        let mut raw = [0u8; 256];
        raw.iter_mut().enumerate().for_each(|(i, b)| *b = (i * 7 + 3) as u8);
        AuthKey::from_bytes(raw)
    }

    #[test]
    fn padding_is_between_12_and_1024() {
        for len in 0..64 {
            let pad = padding_len(len);
            assert!((12..=1024).contains(&pad));
            assert_eq!((len + pad) % 16, 0);
        }
    }

    #[test]
    fn nonce_key_layout() {
        let server_nonce = [1u8; 16];
        let new_nonce = [2u8; 32];
        let m = generate_key_data_from_nonce(&server_nonce, &new_nonce);
        assert_eq!(m.key[..20], sha1!(&new_nonce, &server_nonce));
        assert_eq!(m.iv[8..28], sha1!(&new_nonce, &new_nonce));
        assert_eq!(m.iv[28..], [2u8; 4]);
        assert_eq!(m, generate_key_data_from_nonce(&server_nonce, &new_nonce));
    }

    #[test]
    fn sides_derive_different_keys() {
        let key = test_key();
        let msg_key = [9u8; 16];
        assert_ne!(calc_key(&key, &msg_key, Side::Client), calc_key(&key, &msg_key, Side::Server));
    }

    #[test]
    fn client_ciphertext_decrypts_as_client() {
        let key = test_key();
        let mut buf = DequeBuffer::with_capacity(40, 24);
        buf.extend((0u8..40).collect::<Vec<_>>());
        do_encrypt_data_v2(&mut buf, &key, Side::Client, &[0xaa; 32]);

        let mut wire = buf.to_vec();
        assert_eq!(&wire[..8], &key.key_id());
        assert_eq!((wire.len() - 24) % 16, 0);

        let mut reflected = wire.clone();
        assert_eq!(
            decrypt_data_v2(&mut reflected, &key, Side::Server).unwrap_err(),
            DecryptError::MessageKeyMismatch
        );

        let plain = decrypt_data_v2(&mut wire, &key, Side::Client).unwrap();
        assert_eq!(&plain[..40], (0u8..40).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn wrong_key_id_is_rejected_before_decrypting() {
        let key = test_key();
        let mut wire = vec![0u8; 24 + 16];
        assert_eq!(decrypt_data_v2(&mut wire, &key, Side::Server).unwrap_err(), DecryptError::AuthKeyMismatch);
        let mut short = vec![0u8; 20];
        assert_eq!(decrypt_data_v2(&mut short, &key, Side::Server).unwrap_err(), DecryptError::InvalidBuffer);
    }
}
