//! Service-message envelope handling for one pending request.

use mtlink_mtproto::EncryptedSession;
use mtlink_tl::{Cursor, Deserializable, enums};

use crate::errors::{InvocationError, RpcError};

const ID_RPC_RESULT:       u32 = 0xf35c6d01;
const ID_RPC_ERROR:        u32 = 0x2144ca19;
const ID_MSG_CONTAINER:    u32 = 0x73f1f8dc;
const ID_PONG:             u32 = 0x347773c5;
const ID_MSGS_ACK:         u32 = 0x62d6b459;
const ID_NEW_SESSION:      u32 = 0x9ec20908;
const ID_BAD_SERVER_SALT:  u32 = 0xedab447b;
const ID_BAD_MSG_NOTIFY:   u32 = 0xa7eff811;

/// `bad_server_salt` is `bad_msg_notification` code 48.
const CODE_BAD_SALT: i32 = 48;

/// What a decrypted server message means for the pending request.
#[derive(Debug, PartialEq)]
pub(crate) enum Reply {
    /// The answer body.
    Answer(Vec<u8>),
    /// The request was refused for a reason the session has now corrected
    /// and must be sent again. Carries the refusal code.
    Resend(i32),
    /// Unrelated traffic.
    Ignore,
}

/// Classify `body`, received with `msg_id`, against the request `pending`.
///
/// `rpc_result` and `pong` only answer when they name `pending`; any
/// constructor this layer does not know is itself the answer.
pub(crate) fn classify(
    session: &mut EncryptedSession,
    msg_id:  i64,
    body:    &[u8],
    pending: i64,
) -> Result<Reply, InvocationError> {
    let mut cur = Cursor::from_slice(body);
    let id = u32::deserialize(&mut cur)?;

    match id {
        ID_RPC_RESULT => {
            let req_msg_id = i64::deserialize(&mut cur)?;
            if req_msg_id != pending {
                tracing::debug!("[mtlink] rpc_result for stale msg_id {req_msg_id}");
                return Ok(Reply::Ignore);
            }
            let result = cur.read_to_end();
            if result.get(..4) == Some(&ID_RPC_ERROR.to_le_bytes()[..]) {
                let mut cur = Cursor::from_slice(&result[4..]);
                let code = i32::deserialize(&mut cur)?;
                let message = String::deserialize(&mut cur)?;
                return Err(InvocationError::Rpc(RpcError::from_telegram(code, &message)));
            }
            Ok(Reply::Answer(result.to_vec()))
        }
        ID_PONG => {
            let enums::Pong::Pong(pong) = enums::Pong::from_bytes(body)?;
            if pong.msg_id == pending {
                Ok(Reply::Answer(body.to_vec()))
            } else {
                Ok(Reply::Ignore)
            }
        }
        ID_MSG_CONTAINER => {
            let count = i32::deserialize(&mut cur)?;
            let mut outcome = Reply::Ignore;
            for _ in 0..count {
                let inner_id = i64::deserialize(&mut cur)?;
                let _seq_no  = i32::deserialize(&mut cur)?;
                let len      = i32::deserialize(&mut cur)?;
                let len = usize::try_from(len)
                    .map_err(|_| InvocationError::Deserialize(format!("container entry of length {len}")))?;
                let inner = cur.take(len)?;
                match classify(session, inner_id, inner, pending)? {
                    Reply::Answer(answer) => return Ok(Reply::Answer(answer)),
                    Reply::Resend(code) => outcome = Reply::Resend(code),
                    Reply::Ignore => {}
                }
            }
            Ok(outcome)
        }
        ID_BAD_SERVER_SALT => {
            let bad_msg_id = i64::deserialize(&mut cur)?;
            let _seq_no    = i32::deserialize(&mut cur)?;
            let _code      = i32::deserialize(&mut cur)?;
            let new_salt   = i64::deserialize(&mut cur)?;
            if bad_msg_id != pending {
                return Ok(Reply::Ignore);
            }
            tracing::info!("[mtlink] server rejected our salt, switching to {new_salt}");
            session.set_salt(new_salt);
            Ok(Reply::Resend(CODE_BAD_SALT))
        }
        ID_BAD_MSG_NOTIFY => {
            let bad_msg_id = i64::deserialize(&mut cur)?;
            let _seq_no    = i32::deserialize(&mut cur)?;
            let code       = i32::deserialize(&mut cur)?;
            if bad_msg_id != pending {
                return Ok(Reply::Ignore);
            }
            match code {
                // msg_id too low / too high: our clock is off
                16 | 17 => {
                    let offset = session.update_time_offset(msg_id);
                    tracing::info!("[mtlink] msg_id rejected ({code}), time offset now {offset}s");
                    Ok(Reply::Resend(code))
                }
                _ => Err(InvocationError::BadMessage { code }),
            }
        }
        ID_MSGS_ACK | ID_NEW_SESSION => {
            tracing::trace!("[mtlink] ignoring service message {id:#010x}");
            Ok(Reply::Ignore)
        }
        _ => Ok(Reply::Answer(body.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtlink_crypto::AuthKey;
    use mtlink_mtproto::ServerAuthentication;
    use mtlink_tl::{Serializable, types};

    const PENDING: i64 = 0x6000_0000_0000_0004;

    fn session() -> EncryptedSession {
        EncryptedSession::new(ServerAuthentication {
            auth_key: AuthKey::from_bytes([9; 256]),
            time_offset: 0,
            first_salt: 1,
        })
        .unwrap()
    }

    fn rpc_result(req_msg_id: i64, result: &[u8]) -> Vec<u8> {
        let mut b = ID_RPC_RESULT.to_le_bytes().to_vec();
        b.extend(req_msg_id.to_le_bytes());
        b.extend_from_slice(result);
        b
    }

    fn container(entries: &[(i64, Vec<u8>)]) -> Vec<u8> {
        let mut b = ID_MSG_CONTAINER.to_le_bytes().to_vec();
        b.extend((entries.len() as i32).to_le_bytes());
        for (msg_id, body) in entries {
            b.extend(msg_id.to_le_bytes());
            b.extend(1i32.to_le_bytes());
            b.extend((body.len() as i32).to_le_bytes());
            b.extend_from_slice(body);
        }
        b
    }

    #[test]
    fn matching_rpc_result_answers() {
        let body = rpc_result(PENDING, &[1, 2, 3, 4]);
        assert_eq!(classify(&mut session(), 1, &body, PENDING).unwrap(), Reply::Answer(vec![1, 2, 3, 4]));

        let stale = rpc_result(PENDING - 4, &[1, 2, 3, 4]);
        assert_eq!(classify(&mut session(), 1, &stale, PENDING).unwrap(), Reply::Ignore);
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let mut err = ID_RPC_ERROR.to_le_bytes().to_vec();
        err.extend(420i32.to_le_bytes());
        "FLOOD_WAIT_7".to_string().serialize(&mut err);
        let body = rpc_result(PENDING, &err);

        match classify(&mut session(), 1, &body, PENDING) {
            Err(InvocationError::Rpc(e)) => {
                assert_eq!(e.code, 420);
                assert!(e.is("FLOOD_WAIT"));
                assert_eq!(e.value, Some(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pong_answers_only_its_ping() {
        let pong = types::Pong { msg_id: PENDING, ping_id: 5 }.to_bytes();
        assert_eq!(classify(&mut session(), 1, &pong, PENDING).unwrap(), Reply::Answer(pong.clone()));
        assert_eq!(classify(&mut session(), 1, &pong, PENDING + 4).unwrap(), Reply::Ignore);
    }

    #[test]
    fn container_is_searched() {
        let ack = {
            let mut b = ID_MSGS_ACK.to_le_bytes().to_vec();
            b.extend(0x1cb5c415u32.to_le_bytes());
            b.extend(0i32.to_le_bytes());
            b
        };
        let body = container(&[(8, ack), (12, rpc_result(PENDING, &[7; 8]))]);
        assert_eq!(classify(&mut session(), 16, &body, PENDING).unwrap(), Reply::Answer(vec![7; 8]));

        let truncated = &body[..body.len() - 3];
        assert!(matches!(
            classify(&mut session(), 16, truncated, PENDING),
            Err(InvocationError::Deserialize(_))
        ));
    }

    #[test]
    fn bad_server_salt_adopts_salt_and_resends() {
        let mut s = session();
        let mut body = ID_BAD_SERVER_SALT.to_le_bytes().to_vec();
        body.extend(PENDING.to_le_bytes());
        body.extend(1i32.to_le_bytes());
        body.extend(48i32.to_le_bytes());
        body.extend(0x7777i64.to_le_bytes());

        assert_eq!(classify(&mut s, 1, &body, PENDING).unwrap(), Reply::Resend(48));
        assert_eq!(s.salt(), 0x7777);
    }

    #[test]
    fn bad_msg_notification_codes() {
        let notify = |code: i32| {
            let mut b = ID_BAD_MSG_NOTIFY.to_le_bytes().to_vec();
            b.extend(PENDING.to_le_bytes());
            b.extend(1i32.to_le_bytes());
            b.extend(code.to_le_bytes());
            b
        };
        let mut s = session();
        let server_msg_id = s.next_msg_id();
        assert_eq!(classify(&mut s, server_msg_id, &notify(16), PENDING).unwrap(), Reply::Resend(16));
        assert!(matches!(
            classify(&mut s, server_msg_id, &notify(35), PENDING),
            Err(InvocationError::BadMessage { code: 35 })
        ));
    }

    #[test]
    fn unknown_constructor_is_the_answer() {
        let body = 0x1234_5678u32.to_le_bytes().to_vec();
        assert_eq!(classify(&mut session(), 1, &body, PENDING).unwrap(), Reply::Answer(body.clone()));
    }
}
