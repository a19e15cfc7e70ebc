//! TL binary serialization for the MTProto handshake and service layer.
//!
//! Only the small, fixed set of constructors the transport core needs is
//! defined here. Each one is a plain struct with a compile-time constructor
//! id; there is no runtime schema and no reflective dispatch. The one place
//! where a name is needed (diagnostics) goes through the static table behind
//! [`name_for_id`].
//!
//! | Module        | Contents                                               |
//! |---------------|--------------------------------------------------------|
//! | [`types`]     | Bare constructors as `struct`s                         |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`] |
//! | [`enums`]     | Boxed types as `enum`s implementing [`Deserializable`] |
//!
//! ```rust
//! use mtlink_tl::{functions, Serializable};
//!
//! let req = functions::ReqPqMulti { nonce: [7; 16] };
//! let bytes = req.to_bytes();
//! assert_eq!(bytes.len(), 4 + 16);
//! ```

#![deny(unsafe_code)]

pub mod deserialize;
pub mod serialize;
mod schema;

pub use deserialize::{Cursor, Deserializable};
pub use schema::{enums, functions, name_for_id, types};
pub use serialize::Serializable;

/// Bare vector, `vector` (lowercase) as opposed to the boxed `Vector`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Bytes that are written to the wire verbatim, with no length prefix.
///
/// Used for the `!X` argument of wrapper functions such as
/// [`functions::InvokeAfterMsg`], whose payload is an already serialized query.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

/// Every constructor has a unique 32-bit id.
pub trait Identifiable {
    /// The constructor id as given in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function that can be sent to the server as an RPC call.
pub trait RemoteCall: Serializable {
    /// The type the server answers with.
    type Return: Deserializable;
}
