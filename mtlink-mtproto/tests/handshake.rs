//! Full key exchange against a scripted in-process server.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mtlink_crypto::rsa::PublicKeyRing;
use mtlink_crypto::{AuthKey, CipherKeyMaterial, generate_key_data_from_nonce, ige, sha1};
use mtlink_mtproto::authentication::{Error, IntegrityCheck, ServerAuthentication};
use mtlink_mtproto::{Authenticator, Entropy, Message, MessageId, Phase, plaintext_body};
use mtlink_tl::{Deserializable, Serializable, enums, functions, types};
use num_bigint::BigUint;

const DH_PRIME: &str = "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F\
48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C37\
20FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F64\
2477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4\
A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754\
FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4\
E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F\
0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B";

const FINGERPRINT: i64 = 0x0123_4567_89ab_cdef;
const SERVER_NONCE: [u8; 16] = [0x5a; 16];
const PQ: u64 = 0x17ED48941A08F981;

/// Call `k` yields bytes `37 * i + k`, so the client's `b` is fixed.
struct Scripted {
    calls: u8,
}

impl Entropy for Scripted {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), getrandom::Error> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(self.calls);
        }
        self.calls += 1;
        Ok(())
    }
}

/// Hands the inner data over unencrypted so the scripted server can read
/// `new_nonce` without a private key.
struct PassThrough;

impl PublicKeyRing for PassThrough {
    fn encrypt(&self, fingerprints: &[i64], data: &[u8], _: &[u8; 224]) -> Option<(i64, Vec<u8>)> {
        fingerprints.contains(&FINGERPRINT).then(|| (FINGERPRINT, data.to_vec()))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Script {
    Honest,
    TamperNewNonceHash,
    RejectDhParams,
    TamperAnswerHash,
    ShortPrime,
    TrivialG,
    TrivialGA,
    AnswerRetry,
    AnswerFail,
}

struct Server {
    script: Script,
    a: BigUint,
    dh_prime: BigUint,
    nonce: [u8; 16],
    new_nonce: [u8; 32],
    auth_key: Option<AuthKey>,
}

fn wrap(body: Vec<u8>) -> Vec<u8> {
    Message::plaintext(MessageId(1 << 32), 0, body).to_plaintext_bytes()
}

fn now() -> i32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i32
}

impl Server {
    fn new(script: Script) -> Self {
        let a: Vec<u8> = (0..256u32).map(|i| (i * 11 + 5) as u8).collect();
        Self {
            script,
            a: BigUint::from_bytes_be(&a),
            dh_prime: BigUint::parse_bytes(DH_PRIME.as_bytes(), 16).unwrap(),
            nonce: [0; 16],
            new_nonce: [0; 32],
            auth_key: None,
        }
    }

    fn key_material(&self) -> CipherKeyMaterial {
        generate_key_data_from_nonce(&SERVER_NONCE, &self.new_nonce)
    }

    fn on_req_pq(&mut self, message: &[u8]) -> Vec<u8> {
        let req = functions::ReqPqMulti::from_bytes(plaintext_body(message).unwrap()).unwrap();
        self.nonce = req.nonce;
        wrap(types::ResPq {
            nonce: req.nonce,
            server_nonce: SERVER_NONCE,
            pq: PQ.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![7, FINGERPRINT],
        }
        .to_bytes())
    }

    fn on_req_dh_params(&mut self, message: &[u8]) -> Vec<u8> {
        let req = functions::ReqDhParams::from_bytes(plaintext_body(message).unwrap()).unwrap();
        assert_eq!(req.p, 0x494C553Bu32.to_be_bytes());
        assert_eq!(req.q, 0x53911073u32.to_be_bytes());
        assert_eq!(req.public_key_fingerprint, FINGERPRINT);

        let inner = types::PQInnerData::from_bytes(&req.encrypted_data).unwrap();
        assert_eq!(inner.nonce, self.nonce);
        assert_eq!(inner.server_nonce, SERVER_NONCE);
        assert_eq!(inner.pq, PQ.to_be_bytes());
        self.new_nonce = inner.new_nonce;

        if self.script == Script::RejectDhParams {
            let digest = sha1!(&self.new_nonce);
            let mut new_nonce_hash = [0u8; 16];
            new_nonce_hash.copy_from_slice(&digest[4..]);
            return wrap(types::ServerDhParamsFail {
                nonce: self.nonce,
                server_nonce: SERVER_NONCE,
                new_nonce_hash,
            }
            .to_bytes());
        }

        let g = BigUint::from(3u32);
        let mut inner = types::ServerDhInnerData {
            nonce: self.nonce,
            server_nonce: SERVER_NONCE,
            g: 3,
            dh_prime: self.dh_prime.to_bytes_be(),
            g_a: g.modpow(&self.a, &self.dh_prime).to_bytes_be(),
            server_time: now(),
        };
        match self.script {
            Script::ShortPrime => inner.dh_prime = (&self.dh_prime >> 1u32).to_bytes_be(),
            Script::TrivialG => inner.g = 1,
            Script::TrivialGA => inner.g_a = vec![1],
            _ => {}
        }
        let answer = inner.to_bytes();

        let mut encrypted_answer = sha1!(&answer).to_vec();
        if self.script == Script::TamperAnswerHash {
            encrypted_answer[3] ^= 0x01;
        }
        encrypted_answer.extend_from_slice(&answer);
        encrypted_answer.resize(encrypted_answer.len().div_ceil(16) * 16, 0xee);
        let CipherKeyMaterial { key, iv } = self.key_material();
        ige::encrypt_in_place(&mut encrypted_answer, &key, &iv);

        wrap(types::ServerDhParamsOk { nonce: self.nonce, server_nonce: SERVER_NONCE, encrypted_answer }
            .to_bytes())
    }

    fn on_set_client_dh_params(&mut self, message: &[u8]) -> Vec<u8> {
        let req = functions::SetClientDhParams::from_bytes(plaintext_body(message).unwrap()).unwrap();
        let mut plain = req.encrypted_data;
        let CipherKeyMaterial { key, iv } = self.key_material();
        ige::decrypt_in_place(&mut plain, &key, &iv);

        let inner = types::ClientDhInnerData::from_bytes(&plain[20..]).unwrap();
        let inner_len = inner.to_bytes().len();
        assert_eq!(plain[..20], sha1!(&plain[20..20 + inner_len]));

        let gab = BigUint::from_bytes_be(&inner.g_b).modpow(&self.a, &self.dh_prime);
        let mut key_bytes = [0u8; 256];
        let gab = gab.to_bytes_be();
        key_bytes[256 - gab.len()..].copy_from_slice(&gab);
        let auth_key = AuthKey::from_bytes(key_bytes);

        let (nonce, server_nonce) = (self.nonce, SERVER_NONCE);
        let answer = match self.script {
            Script::AnswerRetry => types::DhGenRetry {
                nonce,
                server_nonce,
                new_nonce_hash2: auth_key.calc_new_nonce_hash(&self.new_nonce, 2),
            }
            .to_bytes(),
            Script::AnswerFail => types::DhGenFail {
                nonce,
                server_nonce,
                new_nonce_hash3: auth_key.calc_new_nonce_hash(&self.new_nonce, 3),
            }
            .to_bytes(),
            _ => {
                let mut new_nonce_hash1 = auth_key.calc_new_nonce_hash(&self.new_nonce, 1);
                if self.script == Script::TamperNewNonceHash {
                    new_nonce_hash1[0] ^= 0x80;
                }
                types::DhGenOk { nonce, server_nonce, new_nonce_hash1 }.to_bytes()
            }
        };
        self.auth_key = Some(auth_key);
        wrap(answer)
    }
}

fn authenticator() -> Authenticator<Scripted> {
    Authenticator::with_entropy(Arc::new(PassThrough), Scripted { calls: 0 })
}

#[tokio::test]
async fn scripted_handshake_pins_key_id() {
    let mut client = authenticator();
    let mut server = Server::new(Script::Honest);

    let (req, handshake) = client.start().unwrap();
    let req = client.handle(&server.on_req_pq(&req)).unwrap();
    assert_eq!(client.phase(), Phase::ServerDHRequest);
    let req = client.handle(&server.on_req_dh_params(&req)).unwrap();
    assert_eq!(client.phase(), Phase::ClientDHRequest);
    assert_eq!(client.handle(&server.on_set_client_dh_params(&req)), None);
    assert_eq!(client.phase(), Phase::NotStarted);

    let ServerAuthentication { auth_key, time_offset, first_salt } = handshake.await.unwrap();

    assert_eq!(Some(&auth_key), server.auth_key.as_ref());
    assert_eq!(auth_key.to_bytes(), server.auth_key.as_ref().unwrap().to_bytes());
    assert_eq!(auth_key.key_id(), [0xa0, 0x6b, 0xf9, 0x76, 0x53, 0x29, 0xc7, 0xd2]);
    assert_eq!(i64::from_le_bytes(auth_key.key_id()), -3258590366924182624);
    assert_eq!(first_salt, 6811097191836384347);
    assert!(time_offset.abs() <= 2);
}

#[tokio::test]
async fn tampered_new_nonce_hash_fails_integrity_check() {
    let mut client = authenticator();
    let mut server = Server::new(Script::TamperNewNonceHash);

    let (req, handshake) = client.start().unwrap();
    let req = client.handle(&server.on_req_pq(&req)).unwrap();
    let req = client.handle(&server.on_req_dh_params(&req)).unwrap();
    assert_eq!(client.handle(&server.on_set_client_dh_params(&req)), None);

    assert_eq!(
        handshake.await,
        Err(Error::IntegrityCheckFailed(IntegrityCheck::NewNonceHash))
    );
    assert_eq!(client.phase(), Phase::NotStarted);

    // Late traffic is ignored once the handshake is over.
    assert_eq!(client.handle(&wrap(vec![0; 8])), None);
    assert_eq!(client.phase(), Phase::NotStarted);
}

#[tokio::test]
async fn server_dh_params_fail_rejects_step() {
    let mut client = authenticator();
    let mut server = Server::new(Script::RejectDhParams);

    let (req, handshake) = client.start().unwrap();
    let req = client.handle(&server.on_req_pq(&req)).unwrap();
    assert_eq!(client.handle(&server.on_req_dh_params(&req)), None);

    assert_eq!(handshake.await, Err(Error::ServerRejectedStep { id: 0x79cb045d }));
    assert_eq!(client.phase(), Phase::NotStarted);
}

#[tokio::test]
async fn replayed_response_is_rejected_not_queued() {
    let mut client = authenticator();
    let mut server = Server::new(Script::Honest);

    let (req, handshake) = client.start().unwrap();
    let res_pq = server.on_req_pq(&req);
    assert!(client.handle(&res_pq).is_some());
    // A second resPQ arrives while the client waits for Server_DH_Params.
    assert_eq!(client.handle(&res_pq), None);

    assert_eq!(handshake.await, Err(Error::ServerRejectedStep { id: 0x05162463 }));
}

/// Run the exchange until the client stops answering and return the outcome.
async fn run(script: Script) -> (Authenticator<Scripted>, Result<ServerAuthentication, Error>) {
    let mut client = authenticator();
    let mut server = Server::new(script);

    let (req, handshake) = client.start().unwrap();
    let mut reply = server.on_req_pq(&req);
    for respond in [Server::on_req_dh_params, Server::on_set_client_dh_params] {
        match client.handle(&reply) {
            Some(req) => reply = respond(&mut server, &req),
            None => break,
        }
    }
    if client.phase() == Phase::ClientDHRequest {
        assert_eq!(client.handle(&reply), None);
    }
    assert_eq!(client.phase(), Phase::NotStarted);
    (client, handshake.await)
}

#[tokio::test]
async fn tampered_answer_hash_fails_integrity_check() {
    let (_, outcome) = run(Script::TamperAnswerHash).await;
    assert_eq!(outcome, Err(Error::IntegrityCheckFailed(IntegrityCheck::AnswerHash)));
}

#[tokio::test]
async fn out_of_range_dh_parameters_are_rejected() {
    for (script, name) in [
        (Script::ShortPrime, "dh_prime"),
        (Script::TrivialG, "g"),
        (Script::TrivialGA, "g_a"),
    ] {
        let (_, outcome) = run(script).await;
        assert_eq!(outcome, Err(Error::GParameterOutOfRange { name }));
    }
}

#[tokio::test]
async fn dh_gen_retry_and_fail_are_reported() {
    let (mut client, outcome) = run(Script::AnswerRetry).await;
    assert_eq!(outcome, Err(Error::DhGenRetry));
    assert_eq!(client.start().unwrap_err(), Error::Spent);

    let (_, outcome) = run(Script::AnswerFail).await;
    assert_eq!(outcome, Err(Error::DhGenFail));
}

#[tokio::test]
async fn finished_authenticator_cannot_restart() {
    let (mut client, outcome) = run(Script::Honest).await;
    assert!(outcome.is_ok());
    assert_eq!(client.start().unwrap_err(), Error::Spent);
    assert_eq!(client.phase(), Phase::NotStarted);
}
