//! The long-lived 2048-bit authorization key.

use std::fmt;

use crate::sha1;

/// A 256-byte authorization key with its derived identifiers.
///
/// `aux_hash` and `key_id` are both taken from SHA-1 of the key and only
/// ever computed together, in [`AuthKey::from_bytes`].
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Construct from the raw 256-byte DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&sha[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self { data, aux_hash, key_id }
    }

    /// The raw key bytes.
    pub fn to_bytes(&self) -> [u8; 256] { self.data }

    /// Key fingerprint, `SHA1(key)[12..20]`, as it appears on the wire.
    pub fn key_id(&self) -> [u8; 8] { self.key_id }

    /// `SHA1(key)[0..8]`.
    pub fn aux_hash(&self) -> [u8; 8] { self.aux_hash }

    /// `new_nonce_hash{number}` the server must echo in `dh_gen_*`.
    ///
    /// `SHA1(new_nonce || number || aux_hash)[4..20]`.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let sha = sha1!(new_nonce, [number], &self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&sha[4..]);
        out
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey(id={})", i64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool { self.key_id == other.key_id }
}

impl Eq for AuthKey {}
