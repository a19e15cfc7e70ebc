//! Hand-written MTProto constructors used by the key exchange and the
//! encrypted service layer.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, Serializable};

/// Declare a bare constructor: struct, id, and both codec directions.
macro_rules! constructor {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        impl Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        #[allow(dead_code)]
        impl $name {
            pub(crate) fn serialize_bare(&self, buf: &mut impl Extend<u8>) {
                $( self.$field.serialize(buf); )+
            }

            pub(crate) fn deserialize_bare(buf: Buffer) -> Result<Self> {
                Ok(Self { $( $field: <$ty>::deserialize(buf)?, )+ })
            }
        }

        impl Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                Self::CONSTRUCTOR_ID.serialize(buf);
                self.serialize_bare(buf);
            }
        }

        impl Deserializable for $name {
            fn deserialize(buf: Buffer) -> Result<Self> {
                buf.expect_constructor(Self::CONSTRUCTOR_ID)?;
                Self::deserialize_bare(buf)
            }
        }
    };
}

/// Declare a boxed type as an enum over bare constructors.
macro_rules! boxed {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident($ty:ty) ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant($ty), )+
        }

        impl Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => x.serialize(buf), )+
                }
            }
        }

        impl Deserializable for $name {
            fn deserialize(buf: Buffer) -> Result<Self> {
                let id = u32::deserialize(buf)?;
                $(
                    if id == <$ty as Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty>::deserialize_bare(buf)?));
                    }
                )+
                Err(Error::UnexpectedConstructor { id })
            }
        }
    };
}

/// Bare constructors.
pub mod types {
    use super::*;

    constructor! {
        /// `resPQ`: the server's answer to `req_pq_multi`.
        ResPq = 0x05162463 {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            /// Big-endian composite to factorize.
            pq: Vec<u8>,
            server_public_key_fingerprints: Vec<i64>,
        }
    }

    constructor! {
        /// `p_q_inner_data`: RSA-encrypted proof of work for `req_DH_params`.
        PQInnerData = 0x83c95aec {
            pq: Vec<u8>,
            p: Vec<u8>,
            q: Vec<u8>,
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            new_nonce: [u8; 32],
        }
    }

    constructor! {
        ServerDhParamsFail = 0x79cb045d {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            new_nonce_hash: [u8; 16],
        }
    }

    constructor! {
        ServerDhParamsOk = 0xd0e8075c {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            /// AES-IGE encrypted `answer_with_hash`.
            encrypted_answer: Vec<u8>,
        }
    }

    constructor! {
        /// `server_DH_inner_data`: the server's half of the exchange.
        ServerDhInnerData = 0xb5890dba {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            g: i32,
            dh_prime: Vec<u8>,
            g_a: Vec<u8>,
            server_time: i32,
        }
    }

    constructor! {
        /// `client_DH_inner_data`: the client's half of the exchange.
        ClientDhInnerData = 0x6643b654 {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            retry_id: i64,
            g_b: Vec<u8>,
        }
    }

    constructor! {
        DhGenOk = 0x3bcbf734 {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            new_nonce_hash1: [u8; 16],
        }
    }

    constructor! {
        DhGenRetry = 0x46dc1fb9 {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            new_nonce_hash2: [u8; 16],
        }
    }

    constructor! {
        DhGenFail = 0xa69dae02 {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            new_nonce_hash3: [u8; 16],
        }
    }

    constructor! {
        Pong = 0x347773c5 {
            msg_id: i64,
            ping_id: i64,
        }
    }
}

/// Boxed types.
pub mod enums {
    use super::*;

    boxed! {
        ResPq { ResPq(types::ResPq) }
    }

    boxed! {
        PQInnerData { PQInnerData(types::PQInnerData) }
    }

    boxed! {
        ServerDhParams {
            Fail(types::ServerDhParamsFail),
            Ok(types::ServerDhParamsOk),
        }
    }

    boxed! {
        ServerDhInnerData { ServerDhInnerData(types::ServerDhInnerData) }
    }

    boxed! {
        ClientDhInnerData { ClientDhInnerData(types::ClientDhInnerData) }
    }

    boxed! {
        SetClientDhParamsAnswer {
            DhGenOk(types::DhGenOk),
            DhGenRetry(types::DhGenRetry),
            DhGenFail(types::DhGenFail),
        }
    }

    boxed! {
        Pong { Pong(types::Pong) }
    }
}

/// RPC functions.
pub mod functions {
    use super::*;
    use crate::{Blob, RemoteCall};

    constructor! {
        ReqPqMulti = 0xbe7e8ef1 {
            nonce: [u8; 16],
        }
    }

    constructor! {
        /// `req_DH_params`.
        ReqDhParams = 0xd712e4be {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            p: Vec<u8>,
            q: Vec<u8>,
            public_key_fingerprint: i64,
            encrypted_data: Vec<u8>,
        }
    }

    constructor! {
        /// `set_client_DH_params`.
        SetClientDhParams = 0xf5045f1f {
            nonce: [u8; 16],
            server_nonce: [u8; 16],
            encrypted_data: Vec<u8>,
        }
    }

    constructor! {
        Ping = 0x7abe77ec {
            ping_id: i64,
        }
    }

    constructor! {
        /// `invokeAfterMsg`: run `query` only after `msg_id` was processed.
        ///
        /// `query` holds an already serialized function and is written as-is.
        InvokeAfterMsg = 0xcb9f372d {
            msg_id: i64,
            query: Blob,
        }
    }

    impl RemoteCall for ReqPqMulti {
        type Return = enums::ResPq;
    }

    impl RemoteCall for ReqDhParams {
        type Return = enums::ServerDhParams;
    }

    impl RemoteCall for SetClientDhParams {
        type Return = enums::SetClientDhParamsAnswer;
    }

    impl RemoteCall for Ping {
        type Return = enums::Pong;
    }
}

/// Constructor id to schema name, for diagnostics.
static NAMES: &[(u32, &str)] = &[
    (0x05162463, "resPQ"),
    (0x83c95aec, "p_q_inner_data"),
    (0x79cb045d, "server_DH_params_fail"),
    (0xd0e8075c, "server_DH_params_ok"),
    (0xb5890dba, "server_DH_inner_data"),
    (0x6643b654, "client_DH_inner_data"),
    (0x3bcbf734, "dh_gen_ok"),
    (0x46dc1fb9, "dh_gen_retry"),
    (0xa69dae02, "dh_gen_fail"),
    (0x347773c5, "pong"),
    (0xbe7e8ef1, "req_pq_multi"),
    (0xd712e4be, "req_DH_params"),
    (0xf5045f1f, "set_client_DH_params"),
    (0x7abe77ec, "ping"),
    (0xcb9f372d, "invokeAfterMsg"),
    (0xf35c6d01, "rpc_result"),
    (0x2144ca19, "rpc_error"),
    (0x73f1f8dc, "msg_container"),
    (0x62d6b459, "msgs_ack"),
    (0xedab447b, "bad_server_salt"),
    (0x9ec20908, "new_session_created"),
    (0xa7eff811, "bad_msg_notification"),
];

/// Look up the schema name of a constructor id.
pub fn name_for_id(id: u32) -> Option<&'static str> {
    NAMES.iter().find(|(known, _)| *known == id).map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, (id, _)) in NAMES.iter().enumerate() {
            assert!(NAMES[i + 1..].iter().all(|(other, _)| other != id), "{id:#x} listed twice");
        }
    }

    #[test]
    fn boxed_dispatch_picks_variant() {
        let fail = types::DhGenFail { nonce: [1; 16], server_nonce: [2; 16], new_nonce_hash3: [3; 16] };
        let bytes = enums::SetClientDhParamsAnswer::DhGenFail(fail.clone()).to_bytes();
        assert_eq!(&bytes[..4], &0xa69dae02u32.to_le_bytes());
        assert_eq!(
            enums::SetClientDhParamsAnswer::from_bytes(&bytes).unwrap(),
            enums::SetClientDhParamsAnswer::DhGenFail(fail)
        );
    }

    #[test]
    fn unknown_boxed_id_is_reported() {
        let bytes = 0xdeadbeefu32.to_le_bytes();
        assert_eq!(
            enums::ServerDhParams::from_bytes(&bytes),
            Err(Error::UnexpectedConstructor { id: 0xdeadbeef })
        );
    }
}
