//! Sans-IO MTProto authorization key generation.
//!
//! Every step takes the server's answer plus the random bytes it needs and
//! returns the next request, so the arithmetic can be driven from fixed
//! inputs in tests. [`crate::Authenticator`] wires the steps to a transport.
//!
//! # Flow
//!
//! ```text
//! let (req, s1) = authentication::step1(&nonce);
//! // send req, receive resp
//! let (req, s2) = authentication::step2(s1, resp, &rnd256, &keys)?;
//! // send req, receive resp
//! let (req, s3) = authentication::step3(s2, resp, &rnd272, now)?;
//! // send req, receive resp
//! let done = authentication::finish(s3, resp)?;
//! // done.auth_key is ready
//! ```

use std::fmt;

use mtlink_crypto::rsa::PublicKeyRing;
use mtlink_crypto::{AuthKey, CipherKeyMaterial, factorize, generate_key_data_from_nonce, ige, sha1};
use mtlink_tl::{Cursor, Deserializable, Identifiable, Serializable, deserialize, enums, functions, types};
use num_bigint::BigUint;
use num_traits::One;

use crate::message::PlaintextError;

/// Bits of the DH prime every handshake must use.
const DH_PRIME_BITS: u64 = 2048;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Which echoed or hashed value failed to match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityCheck {
    /// The server echoed a different `nonce`.
    Nonce,
    /// The server echoed a different `server_nonce`.
    ServerNonce,
    /// SHA-1 in front of `server_DH_inner_data` does not match its contents.
    AnswerHash,
    /// `new_nonce_hash{1,2,3}` does not match the derived auth key.
    NewNonceHash,
}

/// Errors that can occur during auth key generation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// `pq` is prime, a square, or otherwise has no split into two factors.
    FactorizationFailed { pq: u64 },
    /// `pq` was not the 8 bytes the protocol requires.
    InvalidPqSize { size: usize },
    /// None of the offered fingerprints belongs to a known server key.
    UnknownFingerprints { fingerprints: Vec<i64> },
    /// The server answered with a constructor other than the success case.
    ServerRejectedStep { id: u32 },
    /// A nonce echo or hash did not match.
    IntegrityCheckFailed(IntegrityCheck),
    /// The answer could not be parsed.
    MalformedResponse(deserialize::Error),
    /// The plaintext envelope around an answer was invalid.
    MalformedEnvelope(PlaintextError),
    /// `encrypted_answer` is not a whole number of AES blocks.
    EncryptedAnswerNotPadded { len: usize },
    /// A DH parameter is outside its allowed range.
    GParameterOutOfRange { name: &'static str },
    /// The server asked to retry with a new `g_b`.
    DhGenRetry,
    /// The server refused the key exchange.
    DhGenFail,
    /// The random source failed.
    Entropy(getrandom::Error),
    /// A handshake is already in flight on this authenticator.
    AlreadyStarted,
    /// This authenticator already finished or failed; create a new one.
    Spent,
    /// The transport closed before the handshake finished.
    TransportClosed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactorizationFailed { pq } => write!(f, "could not factorize pq={pq}"),
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known fingerprint in {fingerprints:?}")
            }
            Self::ServerRejectedStep { id } => match mtlink_tl::name_for_id(*id) {
                Some(name) => write!(f, "server answered {name}"),
                None => write!(f, "server answered unexpected constructor {id:#010x}"),
            },
            Self::IntegrityCheckFailed(which) => write!(f, "integrity check failed: {which:?}"),
            Self::MalformedResponse(e) => write!(f, "malformed response: {e}"),
            Self::MalformedEnvelope(e) => write!(f, "malformed envelope: {e}"),
            Self::EncryptedAnswerNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::GParameterOutOfRange { name } => write!(f, "DH parameter {name} out of range"),
            Self::DhGenRetry => write!(f, "DH gen retry requested"),
            Self::DhGenFail => write!(f, "DH gen failed"),
            Self::Entropy(e) => write!(f, "random source failed: {e}"),
            Self::AlreadyStarted => write!(f, "handshake already in progress"),
            Self::Spent => write!(f, "authenticator already used"),
            Self::TransportClosed => write!(f, "transport closed during handshake"),
        }
    }
}

impl From<deserialize::Error> for Error {
    fn from(e: deserialize::Error) -> Self {
        match e {
            deserialize::Error::UnexpectedConstructor { id } => Self::ServerRejectedStep { id },
            other => Self::MalformedResponse(other),
        }
    }
}

impl From<PlaintextError> for Error {
    fn from(e: PlaintextError) -> Self { Self::MalformedEnvelope(e) }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State after step 1.
#[derive(Debug)]
pub struct Step1 { nonce: [u8; 16] }

/// State after step 2.
#[derive(Debug)]
pub struct Step2 {
    nonce:        [u8; 16],
    server_nonce: [u8; 16],
    new_nonce:    [u8; 32],
}

/// State after step 3.
#[derive(Debug)]
pub struct Step3 {
    nonce:        [u8; 16],
    server_nonce: [u8; 16],
    new_nonce:    [u8; 32],
    gab:          BigUint,
    time_offset:  i32,
}

/// The result of a successful handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerAuthentication {
    /// The shared 2048-bit authorization key.
    pub auth_key:    AuthKey,
    /// Server clock minus local clock, in seconds.
    pub time_offset: i32,
    /// Salt to use until the server hands out a new one.
    pub first_salt:  i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

/// Build `req_pq_multi` around a fresh random `nonce`.
pub fn step1(nonce: &[u8; 16]) -> (functions::ReqPqMulti, Step1) {
    let nonce = *nonce;
    (functions::ReqPqMulti { nonce }, Step1 { nonce })
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `resPQ` and build `req_DH_params`.
///
/// `random` supplies `new_nonce` (32 bytes) followed by the 224 bytes
/// RSA_PAD consumes.
pub fn step2(
    data:     Step1,
    response: enums::ResPq,
    random:   &[u8; 256],
    keys:     &dyn PublicKeyRing,
) -> Result<(functions::ReqDhParams, Step2), Error> {
    let Step1 { nonce } = data;
    let enums::ResPq::ResPq(res_pq) = response;

    check_nonce(&res_pq.nonce, &nonce)?;

    let pq_bytes: [u8; 8] = res_pq.pq.as_slice().try_into()
        .map_err(|_| Error::InvalidPqSize { size: res_pq.pq.len() })?;
    let pq = u64::from_be_bytes(pq_bytes);
    let (p, q) = factorize(pq).ok_or(Error::FactorizationFailed { pq })?;

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);
    let mut rsa_random = [0u8; 224];
    rsa_random.copy_from_slice(&random[32..]);

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let pq_inner = types::PQInnerData {
        pq: pq_bytes.to_vec(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
    }
    .to_bytes();

    let (fingerprint, encrypted_data) = keys
        .encrypt(&res_pq.server_public_key_fingerprints, &pq_inner, &rsa_random)
        .ok_or_else(|| Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        })?;

    Ok((
        functions::ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: fingerprint,
            encrypted_data,
        },
        Step2 { nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

/// Big-endian bytes without leading zeros.
fn trim_be(v: u64) -> Vec<u8> {
    let b = v.to_be_bytes();
    let skip = b.iter().position(|&x| x != 0).unwrap_or(7);
    b[skip..].to_vec()
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `Server_DH_Params` and build `set_client_DH_params`.
///
/// `random` supplies the private exponent `b` (256 bytes) followed by up to
/// 16 bytes of padding. `now` is local Unix time in seconds.
pub fn step3(
    data:     Step2,
    response: enums::ServerDhParams,
    random:   &[u8; 272],
    now:      i32,
) -> Result<(functions::SetClientDhParams, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = data;

    let mut server_dh_ok = match response {
        enums::ServerDhParams::Fail(f) => {
            check_nonce(&f.nonce, &nonce)?;
            check_server_nonce(&f.server_nonce, &server_nonce)?;
            let digest = sha1!(&new_nonce);
            check_new_nonce_hash(&f.new_nonce_hash, &digest[4..])?;
            return Err(Error::ServerRejectedStep { id: types::ServerDhParamsFail::CONSTRUCTOR_ID });
        }
        enums::ServerDhParams::Ok(x) => x,
    };

    check_nonce(&server_dh_ok.nonce, &nonce)?;
    check_server_nonce(&server_dh_ok.server_nonce, &server_nonce)?;

    let len = server_dh_ok.encrypted_answer.len();
    if len % 16 != 0 {
        return Err(Error::EncryptedAnswerNotPadded { len });
    }
    if len < 32 {
        return Err(Error::MalformedResponse(deserialize::Error::UnexpectedEof));
    }

    let CipherKeyMaterial { key, iv } = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    ige::decrypt_in_place(&mut server_dh_ok.encrypted_answer, &key, &iv);
    let plain = server_dh_ok.encrypted_answer;

    let (got_hash, answer) = plain.split_at(20);
    let mut cursor = Cursor::from_slice(answer);
    let enums::ServerDhInnerData::ServerDhInnerData(inner) =
        enums::ServerDhInnerData::deserialize(&mut cursor)?;

    if sha1!(&answer[..cursor.pos()]) != got_hash {
        return Err(Error::IntegrityCheckFailed(IntegrityCheck::AnswerHash));
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    if dh_prime.bits() != DH_PRIME_BITS {
        return Err(Error::GParameterOutOfRange { name: "dh_prime" });
    }
    let g = u32::try_from(inner.g)
        .map(BigUint::from)
        .map_err(|_| Error::GParameterOutOfRange { name: "g" })?;
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let time_offset = inner.server_time.wrapping_sub(now);

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);

    let one = BigUint::one();
    let prime_minus_one = &dh_prime - &one;
    check_g_in_range("g", &g, &one, &prime_minus_one)?;
    check_g_in_range("g_a", &g_a, &one, &prime_minus_one)?;
    check_g_in_range("g_b", &g_b, &one, &prime_minus_one)?;
    let safety = BigUint::one() << (DH_PRIME_BITS - 64);
    let upper = &dh_prime - &safety;
    check_g_in_range("g_a", &g_a, &safety, &upper)?;
    check_g_in_range("g_b", &g_b, &safety, &upper)?;

    let client_dh_inner = types::ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    }
    .to_bytes();

    let pad_len = (16 - ((20 + client_dh_inner.len()) % 16)) % 16;
    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + pad_len);
    hashed.extend_from_slice(&sha1!(&client_dh_inner));
    hashed.extend_from_slice(&client_dh_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    ige::encrypt_in_place(&mut hashed, &key, &iv);

    Ok((
        functions::SetClientDhParams { nonce, server_nonce, encrypted_data: hashed },
        Step3 { nonce, server_nonce, new_nonce, gab, time_offset },
    ))
}

// ─── finish: create_key ──────────────────────────────────────────────────────

/// Check the server's verdict and derive the auth key.
pub fn finish(
    data:     Step3,
    response: enums::SetClientDhParamsAnswer,
) -> Result<ServerAuthentication, Error> {
    let Step3 { nonce, server_nonce, new_nonce, gab, time_offset } = data;

    let (answer_nonce, answer_server_nonce, hash, num) = match response {
        enums::SetClientDhParamsAnswer::DhGenOk(x) =>
            (x.nonce, x.server_nonce, x.new_nonce_hash1, 1),
        enums::SetClientDhParamsAnswer::DhGenRetry(x) =>
            (x.nonce, x.server_nonce, x.new_nonce_hash2, 2),
        enums::SetClientDhParamsAnswer::DhGenFail(x) =>
            (x.nonce, x.server_nonce, x.new_nonce_hash3, 3),
    };

    check_nonce(&answer_nonce, &nonce)?;
    check_server_nonce(&answer_server_nonce, &server_nonce)?;

    let mut key_bytes = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    key_bytes[256 - gab_bytes.len()..].copy_from_slice(&gab_bytes);

    let auth_key = AuthKey::from_bytes(key_bytes);
    check_new_nonce_hash(&hash, &auth_key.calc_new_nonce_hash(&new_nonce, num))?;

    let mut salt = [0u8; 8];
    for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
        *dst = a ^ b;
    }
    let first_salt = i64::from_le_bytes(salt);

    match num {
        1 => Ok(ServerAuthentication { auth_key, time_offset, first_salt }),
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else {
        Err(Error::IntegrityCheckFailed(IntegrityCheck::Nonce))
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else {
        Err(Error::IntegrityCheckFailed(IntegrityCheck::ServerNonce))
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8]) -> Result<(), Error> {
    if got[..] == *expected { Ok(()) } else {
        Err(Error::IntegrityCheckFailed(IntegrityCheck::NewNonceHash))
    }
}

fn check_g_in_range(name: &'static str, val: &BigUint, lo: &BigUint, hi: &BigUint) -> Result<(), Error> {
    if lo < val && val < hi { Ok(()) } else {
        Err(Error::GParameterOutOfRange { name })
    }
}
