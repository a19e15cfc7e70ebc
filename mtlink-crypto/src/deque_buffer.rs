//! Byte buffer with reserved headroom, so headers can be prepended after the
//! payload has been written without moving it.

use std::ops::{Index, IndexMut};
use std::slice::SliceIndex;

/// Growable byte buffer with cheap front insertion.
#[derive(Clone, Debug)]
pub struct DequeBuffer {
    buf: Vec<u8>,
    head: usize,
}

impl DequeBuffer {
    /// Reserve `back` bytes of payload capacity and `front` bytes of headroom.
    pub fn with_capacity(back: usize, front: usize) -> Self {
        let mut buf = Vec::with_capacity(front + back);
        buf.resize(front, 0);
        Self { buf, head: front }
    }

    /// Prepend `slice`. Grows the headroom if it is exhausted.
    pub fn extend_front(&mut self, slice: &[u8]) {
        if slice.len() > self.head {
            let grow = slice.len() - self.head;
            self.buf.splice(0..0, std::iter::repeat_n(0u8, grow));
            self.head += grow;
        }
        self.head -= slice.len();
        self.buf[self.head..self.head + slice.len()].copy_from_slice(slice);
    }

    /// Number of bytes in use.
    pub fn len(&self) -> usize { self.buf.len() - self.head }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Copy the contents out.
    pub fn to_vec(&self) -> Vec<u8> { self.as_ref().to_vec() }
}

impl AsRef<[u8]> for DequeBuffer {
    fn as_ref(&self) -> &[u8] { &self.buf[self.head..] }
}

impl AsMut<[u8]> for DequeBuffer {
    fn as_mut(&mut self) -> &mut [u8] { &mut self.buf[self.head..] }
}

impl<I: SliceIndex<[u8]>> Index<I> for DequeBuffer {
    type Output = I::Output;
    fn index(&self, i: I) -> &Self::Output { self.as_ref().index(i) }
}

impl<I: SliceIndex<[u8]>> IndexMut<I> for DequeBuffer {
    fn index_mut(&mut self, i: I) -> &mut Self::Output { self.as_mut().index_mut(i) }
}

impl Extend<u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = u8>>(&mut self, iter: T) { self.buf.extend(iter); }
}

impl<'a> Extend<&'a u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = &'a u8>>(&mut self, iter: T) { self.buf.extend(iter); }
}
