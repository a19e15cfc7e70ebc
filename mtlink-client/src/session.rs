//! Auth key persistence: saves the key, time offset and first salt.
//!
//! The file is a fixed 268-byte record:
//!
//! ```text
//! auth_key:[u8; 256]  time_offset:i32  first_salt:i64
//! ```
//!
//! with both integers little-endian.

use std::io;
use std::path::Path;

use mtlink_crypto::AuthKey;
use mtlink_mtproto::ServerAuthentication;

/// Size of a saved session on disk.
pub const PERSISTED_LEN: usize = 256 + 4 + 8;

/// What survives a restart: enough to skip the key exchange.
#[derive(Clone, PartialEq)]
pub struct PersistedAuth {
    /// The 2048-bit auth key.
    pub auth_key:    [u8; 256],
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
    /// Server salt to start the next session with.
    pub first_salt:  i64,
}

impl std::fmt::Debug for PersistedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedAuth")
            .field("auth_key", &AuthKey::from_bytes(self.auth_key))
            .field("time_offset", &self.time_offset)
            .field("first_salt", &self.first_salt)
            .finish()
    }
}

impl PersistedAuth {
    /// The fixed 268-byte record.
    pub fn to_bytes(&self) -> [u8; PERSISTED_LEN] {
        let mut b = [0u8; PERSISTED_LEN];
        b[..256].copy_from_slice(&self.auth_key);
        b[256..260].copy_from_slice(&self.time_offset.to_le_bytes());
        b[260..].copy_from_slice(&self.first_salt.to_le_bytes());
        b
    }

    /// Parse a record. Any length other than 268 is [`io::ErrorKind::InvalidData`].
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        let mut p = 0usize;
        macro_rules! r {
            ($n:expr) => {{
                if p + $n > buf.len() {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated session"));
                }
                let s = &buf[p..p + $n];
                p += $n;
                s
            }};
        }
        let auth_key: [u8; 256] = r!(256).try_into().unwrap();
        let time_offset = i32::from_le_bytes(r!(4).try_into().unwrap());
        let first_salt  = i64::from_le_bytes(r!(8).try_into().unwrap());
        if p != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("session has {} trailing bytes", buf.len() - p),
            ));
        }
        Ok(Self { auth_key, time_offset, first_salt })
    }

    /// Write the record to `path`, replacing any previous file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    /// Read a record written by [`PersistedAuth::save`].
    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

impl From<&ServerAuthentication> for PersistedAuth {
    fn from(auth: &ServerAuthentication) -> Self {
        Self {
            auth_key:    auth.auth_key.to_bytes(),
            time_offset: auth.time_offset,
            first_salt:  auth.first_salt,
        }
    }
}

impl From<PersistedAuth> for ServerAuthentication {
    fn from(saved: PersistedAuth) -> Self {
        Self {
            auth_key:    AuthKey::from_bytes(saved.auth_key),
            time_offset: saved.time_offset,
            first_salt:  saved.first_salt,
        }
    }
}
