/// SHA-1 over the concatenation of one or more byte slices.
#[macro_export]
macro_rules! sha1 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use sha1::{Digest, Sha1};
        let mut h = Sha1::new();
        $( h.update($x); )+
        let out: [u8; 20] = h.finalize().into();
        out
    }};
}

/// SHA-256 over the concatenation of one or more byte slices.
#[macro_export]
macro_rules! sha256 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        $( h.update($x); )+
        let out: [u8; 32] = h.finalize().into();
        out
    }};
}
