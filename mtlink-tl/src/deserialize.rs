//! The [`Deserializable`] trait, the [`Cursor`] it reads from, and
//! primitive implementations.

use std::fmt;

use crate::serialize::bytes_padding;

/// Errors that can occur during deserialization.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Ran out of bytes before the value was fully read.
    UnexpectedEof,
    /// Read a constructor id that does not belong to the expected type.
    UnexpectedConstructor {
        /// The id found on the wire.
        id: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnexpectedConstructor { id } => match crate::name_for_id(*id) {
                Some(name) => write!(f, "unexpected constructor {name}#{id:08x}"),
                None => write!(f, "unexpected constructor id: {id:#010x}"),
            },
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for deserialization.
pub type Result<T> = std::result::Result<T, Error>;

/// A cursor over an in-memory byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize { self.pos }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof)?;
        let out = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Fill `out` completely.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    /// Consume everything that is left.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Read a constructor id and fail unless it equals `expected`.
    pub fn expect_constructor(&mut self, expected: u32) -> Result<()> {
        match u32::deserialize(self)? {
            id if id == expected => Ok(()),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

/// Shorthand used by the constructor impls.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

/// Deserialize a value from TL binary format.
pub trait Deserializable: Sized {
    /// Read `Self` from `buf`, advancing its position.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Deserialize from the start of a byte slice; trailing bytes are ignored.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        Self::deserialize(&mut cursor)
    }
}

macro_rules! le_int {
    ($($t:ty),+) => {$(
        impl Deserializable for $t {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let raw = buf.take(std::mem::size_of::<$t>())?;
                Ok(<$t>::from_le_bytes(raw.try_into().expect("take returned the requested length")))
            }
        }
    )+};
}

le_int!(i32, u32, i64, f64);

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x997275b5 => Ok(true),
            0xbc799737 => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut out = [0u8; N];
        buf.read_exact(&mut out)?;
        Ok(out)
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let (len, header) = match buf.read_byte()? {
            0xfe => {
                let b = buf.take(3)?;
                (b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16, 4)
            }
            short => (short as usize, 1),
        };
        let data = buf.take(len)?.to_vec();
        buf.take(bytes_padding(header, len))?;
        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let bytes = Vec::<u8>::deserialize(buf)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.expect_constructor(0x1cb5c415)?;
        Ok(crate::RawVec::<T>::deserialize(buf)?.0)
    }
}

impl<T: Deserializable> Deserializable for crate::RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = i32::deserialize(buf)?;
        let len = usize::try_from(len).map_err(|_| Error::UnexpectedEof)?;
        (0..len).map(|_| T::deserialize(buf)).collect::<Result<_>>().map(crate::RawVec)
    }
}

impl Deserializable for crate::Blob {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(crate::Blob(buf.read_to_end().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_bytes_are_eof() {
        assert_eq!(Vec::<u8>::from_bytes(&[5, 1, 2]), Err(Error::UnexpectedEof));
    }

    #[test]
    fn padding_is_consumed() {
        let mut cur = Cursor::from_slice(&[2, 0xaa, 0xbb, 0, 0x11, 0, 0, 0]);
        assert_eq!(Vec::<u8>::deserialize(&mut cur).unwrap(), [0xaa, 0xbb]);
        assert_eq!(i32::deserialize(&mut cur).unwrap(), 0x11);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn wrong_vector_header_is_rejected() {
        let bytes = [0u8; 8];
        assert_eq!(
            Vec::<i64>::from_bytes(&bytes),
            Err(Error::UnexpectedConstructor { id: 0 })
        );
    }
}
