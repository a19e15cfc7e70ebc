//! The [`Serializable`] trait and its implementations for primitive TL types.
//!
//! All integers are little-endian. `bytes`/`string` values carry a one- or
//! four-byte length header and are zero-padded to a multiple of four.

/// Serialize `self` into TL binary format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Allocate a fresh `Vec<u8>` and serialize into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.serialize(&mut v);
        v
    }
}

macro_rules! le_int {
    ($($t:ty),+) => {$(
        impl Serializable for $t {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
        }
    )+};
}

le_int!(i32, u32, i64, f64);

/// `boolTrue#997275b5` / `boolFalse#bc799737`.
impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id: u32 = if *self { 0x997275b5 } else { 0xbc799737 };
        id.serialize(buf);
    }
}

impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

/// Number of zero bytes that follow a `bytes` value of `len` bytes whose
/// header took `header` bytes.
pub(crate) fn bytes_padding(header: usize, len: usize) -> usize {
    (4 - (header + len) % 4) % 4
}

fn serialize_bytes(data: &[u8], buf: &mut impl Extend<u8>) {
    let len = data.len();
    let header = if len <= 253 {
        buf.extend([len as u8]);
        1
    } else {
        buf.extend([0xfe, len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        4
    };
    buf.extend(data.iter().copied());
    buf.extend(std::iter::repeat_n(0u8, bytes_padding(header, len)));
}

impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self, buf);
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self, buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_bytes(self.as_bytes(), buf);
    }
}

/// Boxed `Vector<T>`, prefixed with constructor id `0x1cb5c415`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        0x1cb5c415u32.serialize(buf);
        crate::RawVec::<T>::serialize_items(self, buf);
    }
}

impl<T: Serializable> crate::RawVec<T> {
    fn serialize_items(items: &[T], buf: &mut impl Extend<u8>) {
        (items.len() as i32).serialize(buf);
        items.iter().for_each(|item| item.serialize(buf));
    }
}

/// Bare `vector<T>`: a count followed by items.
impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::serialize_items(&self.0, buf);
    }
}

impl Serializable for crate::Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}
