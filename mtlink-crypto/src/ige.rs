//! AES-256 in Infinite Garble Extension mode.
//!
//! The 32-byte IV is split into two rolling 16-byte vectors. Each output
//! block depends on every earlier block in both directions, so one flipped
//! ciphertext bit corrupts the rest of the decrypted message.
//!
//! [`encrypt`] right-pads with random bytes up to the block size. The pad
//! cannot be told apart from data afterwards; callers must know the true
//! plaintext length from the payload itself.

use std::fmt;

use crate::aes::{Aes, BLOCK_LEN};

/// Errors from the checked [`encrypt`] / [`decrypt`] entry points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgeError {
    EmptyInput,
    EmptyKey,
    EmptyIv,
    /// Key was not 32 bytes.
    InvalidKeyLength { len: usize },
    /// IV was not 32 bytes.
    InvalidIvLength { len: usize },
    /// Ciphertext length is not a multiple of 16.
    NotBlockAligned { len: usize },
    /// The OS random source failed while producing padding.
    Rng,
}

impl fmt::Display for IgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input is empty"),
            Self::EmptyKey => write!(f, "key is empty"),
            Self::EmptyIv => write!(f, "iv is empty"),
            Self::InvalidKeyLength { len } => write!(f, "key must be 32 bytes, got {len}"),
            Self::InvalidIvLength { len } => write!(f, "iv must be 32 bytes, got {len}"),
            Self::NotBlockAligned { len } => write!(f, "length {len} is not a multiple of 16"),
            Self::Rng => write!(f, "random source unavailable"),
        }
    }
}

impl std::error::Error for IgeError {}

fn xor_into(dst: &mut [u8; BLOCK_LEN], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

fn split_iv(iv: &[u8; 32]) -> ([u8; BLOCK_LEN], [u8; BLOCK_LEN]) {
    let mut iv1 = [0u8; BLOCK_LEN];
    let mut iv2 = [0u8; BLOCK_LEN];
    iv1.copy_from_slice(&iv[..BLOCK_LEN]);
    iv2.copy_from_slice(&iv[BLOCK_LEN..]);
    (iv1, iv2)
}

fn engine(key: &[u8; 32], for_encryption: bool) -> Aes {
    match Aes::new(key, for_encryption) {
        Ok(aes) => aes,
        Err(_) => unreachable!("32-byte keys are always valid"),
    }
}

/// Encrypt `buffer` in place. No padding is added.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn encrypt_in_place(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % BLOCK_LEN, 0, "IGE input must be block aligned");
    let aes = engine(key, true);
    let (mut iv1, mut iv2) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK_LEN) {
        let mut plain = [0u8; BLOCK_LEN];
        plain.copy_from_slice(chunk);

        let mut block = plain;
        xor_into(&mut block, &iv1);
        aes.process_block_in_place(&mut block);
        xor_into(&mut block, &iv2);

        chunk.copy_from_slice(&block);
        iv1 = block;
        iv2 = plain;
    }
}

/// Decrypt `buffer` in place.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn decrypt_in_place(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % BLOCK_LEN, 0, "IGE input must be block aligned");
    let aes = engine(key, false);
    let (mut iv1, mut iv2) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK_LEN) {
        let mut cipher = [0u8; BLOCK_LEN];
        cipher.copy_from_slice(chunk);

        let mut block = cipher;
        xor_into(&mut block, &iv2);
        aes.process_block_in_place(&mut block);
        xor_into(&mut block, &iv1);

        chunk.copy_from_slice(&block);
        iv1 = cipher;
        iv2 = block;
    }
}

fn check_key_iv<'a>(key: &'a [u8], iv: &'a [u8]) -> Result<(&'a [u8; 32], &'a [u8; 32]), IgeError> {
    if key.is_empty() {
        return Err(IgeError::EmptyKey);
    }
    if iv.is_empty() {
        return Err(IgeError::EmptyIv);
    }
    let key = key.try_into().map_err(|_| IgeError::InvalidKeyLength { len: key.len() })?;
    let iv = iv.try_into().map_err(|_| IgeError::InvalidIvLength { len: iv.len() })?;
    Ok((key, iv))
}

/// Pad `plaintext` with random bytes to a multiple of 16 and encrypt it.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, IgeError> {
    if plaintext.is_empty() {
        return Err(IgeError::EmptyInput);
    }
    let (key, iv) = check_key_iv(key, iv)?;

    let pad = (BLOCK_LEN - plaintext.len() % BLOCK_LEN) % BLOCK_LEN;
    let mut buffer = Vec::with_capacity(plaintext.len() + pad);
    buffer.extend_from_slice(plaintext);
    buffer.resize(plaintext.len() + pad, 0);
    getrandom::getrandom(&mut buffer[plaintext.len()..]).map_err(|_| IgeError::Rng)?;

    encrypt_in_place(&mut buffer, key, iv);
    Ok(buffer)
}

/// Decrypt a block-aligned `ciphertext`.
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, IgeError> {
    if ciphertext.is_empty() {
        return Err(IgeError::EmptyInput);
    }
    let (key, iv) = check_key_iv(key, iv)?;
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(IgeError::NotBlockAligned { len: ciphertext.len() });
    }

    let mut buffer = ciphertext.to_vec();
    decrypt_in_place(&mut buffer, key, iv);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_reaches_block_boundary() {
        let out = encrypt(&[1, 2, 3], &[7; 32], &[9; 32]).unwrap();
        assert_eq!(out.len(), 16);
        let back = decrypt(&out, &[7; 32], &[9; 32]).unwrap();
        assert_eq!(&back[..3], &[1, 2, 3]);
    }

    #[test]
    fn aligned_plaintext_gets_no_padding() {
        assert_eq!(encrypt(&[0; 32], &[7; 32], &[9; 32]).unwrap().len(), 32);
    }

    #[test]
    fn argument_errors() {
        assert_eq!(encrypt(&[], &[7; 32], &[9; 32]), Err(IgeError::EmptyInput));
        assert_eq!(decrypt(&[0; 16], &[], &[9; 32]), Err(IgeError::EmptyKey));
        assert_eq!(decrypt(&[0; 16], &[7; 32], &[]), Err(IgeError::EmptyIv));
        assert_eq!(decrypt(&[0; 16], &[7; 16], &[9; 32]), Err(IgeError::InvalidKeyLength { len: 16 }));
        assert_eq!(decrypt(&[0; 17], &[7; 32], &[9; 32]), Err(IgeError::NotBlockAligned { len: 17 }));
    }

    #[test]
    fn bit_error_garbles_all_following_blocks() {
        let key = [0x42; 32];
        let iv = [0x24; 32];
        let plain = [0u8; 64];
        let mut cipher = plain;
        encrypt_in_place(&mut cipher, &key, &iv);
        cipher[20] ^= 1;
        decrypt_in_place(&mut cipher, &key, &iv);

        assert_eq!(&cipher[..16], &plain[..16]);
        for block in cipher[16..].chunks(16) {
            assert_ne!(block, &plain[..16]);
        }
    }
}
