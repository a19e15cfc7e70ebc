//! The handshake state machine.
//!
//! An [`Authenticator`] owns one connection while the key exchange runs. The
//! caller feeds it every plaintext message the transport delivers and sends
//! whatever it hands back; the outcome arrives on the [`Handshake`] future
//! returned by [`Authenticator::start`]. An authenticator runs one exchange:
//! once the outcome is known, success or not, `start` fails with
//! [`Error::Spent`] and a retry needs a new instance.
//!
//! ```text
//! NotStarted ─start─▶ PQRequest ─resPQ─▶ ServerDHRequest ─server_DH_params─▶
//!     ClientDHRequest ─dh_gen_ok─▶ NotStarted (resolved Ok)
//! any failure ─────────────────────────────────────▶ NotStarted (resolved Err)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::{debug, trace, warn};
use mtlink_crypto::rsa::PublicKeyRing;
use mtlink_tl::{Deserializable, enums};
use tokio::sync::oneshot;

use crate::authentication::{self, Error, ServerAuthentication, Step1, Step2, Step3};
use crate::message::{plaintext_body, since_epoch};
use crate::session::Session;

/// Source of the handshake's secret random bytes.
pub trait Entropy: Send {
    /// Fill `buf` completely.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), getrandom::Error>;
}

/// Operating system randomness via `getrandom`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), getrandom::Error> {
        getrandom::getrandom(buf)
    }
}

/// Where an [`Authenticator`] is in the exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No handshake in flight. Incoming messages are ignored.
    NotStarted,
    /// `req_pq_multi` sent, waiting for `resPQ`.
    PQRequest,
    /// `req_DH_params` sent, waiting for `Server_DH_Params`.
    ServerDHRequest,
    /// `set_client_DH_params` sent, waiting for `Set_client_DH_params_answer`.
    ClientDHRequest,
}

enum Pending {
    PQRequest(Step1),
    ServerDHRequest(Step2),
    ClientDHRequest(Step3),
}

enum Advance {
    Send(Pending, Vec<u8>),
    Done(ServerAuthentication),
}

/// Resolves once, with the handshake's outcome.
///
/// If the [`Authenticator`] is dropped first this yields
/// [`Error::TransportClosed`].
#[derive(Debug)]
pub struct Handshake(oneshot::Receiver<Result<ServerAuthentication, Error>>);

impl Handshake {
    /// The outcome, if it is already known.
    pub fn try_take(&mut self) -> Option<Result<ServerAuthentication, Error>> {
        match self.0.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::TransportClosed)),
        }
    }
}

impl Future for Handshake {
    type Output = Result<ServerAuthentication, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::TransportClosed)))
    }
}

/// Drives one auth key exchange over plaintext messages.
pub struct Authenticator<E: Entropy = OsEntropy> {
    state:   Option<Pending>,
    session: Session,
    entropy: E,
    keys:    Arc<dyn PublicKeyRing>,
    done:    Option<oneshot::Sender<Result<ServerAuthentication, Error>>>,
    spent:   bool,
}

impl Authenticator<OsEntropy> {
    /// An authenticator using OS randomness.
    pub fn new(keys: Arc<dyn PublicKeyRing>) -> Self {
        Self::with_entropy(keys, OsEntropy)
    }
}

impl<E: Entropy> Authenticator<E> {
    /// An authenticator drawing its random bytes from `entropy`.
    pub fn with_entropy(keys: Arc<dyn PublicKeyRing>, entropy: E) -> Self {
        Self { state: None, session: Session::new(), entropy, keys, done: None, spent: false }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        match self.state {
            None => Phase::NotStarted,
            Some(Pending::PQRequest(_)) => Phase::PQRequest,
            Some(Pending::ServerDHRequest(_)) => Phase::ServerDHRequest,
            Some(Pending::ClientDHRequest(_)) => Phase::ClientDHRequest,
        }
    }

    /// Begin the exchange. Returns the first message to send and the future
    /// that resolves with the outcome.
    pub fn start(&mut self) -> Result<(Vec<u8>, Handshake), Error> {
        if self.spent {
            return Err(Error::Spent);
        }
        if self.state.is_some() || self.done.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let mut nonce = [0u8; 16];
        self.entropy.fill(&mut nonce).map_err(Error::Entropy)?;
        let (request, step) = authentication::step1(&nonce);

        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        self.state = Some(Pending::PQRequest(step));
        debug!("[mtlink] handshake: sending req_pq_multi");
        Ok((self.session.pack(&request).to_plaintext_bytes(), Handshake(rx)))
    }

    /// Feed one plaintext message from the server.
    ///
    /// Returns the next message to send, or `None` when there is nothing to
    /// send: the handshake finished, failed, or was never started.
    pub fn handle(&mut self, message: &[u8]) -> Option<Vec<u8>> {
        let Some(pending) = self.state.take() else {
            trace!("[mtlink] handshake: ignoring {} byte message, not started", message.len());
            return None;
        };

        match self.advance(pending, message) {
            Ok(Advance::Send(next, request)) => {
                self.state = Some(next);
                Some(request)
            }
            Ok(Advance::Done(auth)) => {
                debug!("[mtlink] handshake: auth key {:?} ready", auth.auth_key);
                self.resolve(Ok(auth));
                None
            }
            Err(e) => {
                warn!("[mtlink] handshake failed: {e}");
                self.resolve(Err(e));
                None
            }
        }
    }

    /// Fail the pending handshake with `error`, e.g. when the transport
    /// closes underneath it. Does nothing if no handshake is pending.
    pub fn abort(&mut self, error: Error) {
        if self.done.is_some() {
            warn!("[mtlink] handshake aborted in {:?}: {error}", self.phase());
            self.state = None;
            self.resolve(Err(error));
        }
    }

    fn advance(&mut self, pending: Pending, message: &[u8]) -> Result<Advance, Error> {
        let body = plaintext_body(message)?;

        match pending {
            Pending::PQRequest(step) => {
                let response = enums::ResPq::from_bytes(body)?;
                let mut random = [0u8; 256];
                self.entropy.fill(&mut random).map_err(Error::Entropy)?;
                let (request, step) =
                    authentication::step2(step, response, &random, self.keys.as_ref())?;
                debug!("[mtlink] handshake: pq factorized, sending req_DH_params");
                Ok(Advance::Send(Pending::ServerDHRequest(step), self.pack(&request)))
            }
            Pending::ServerDHRequest(step) => {
                let response = enums::ServerDhParams::from_bytes(body)?;
                let mut random = [0u8; 272];
                self.entropy.fill(&mut random).map_err(Error::Entropy)?;
                let now = since_epoch().as_secs() as i32;
                let (request, step) = authentication::step3(step, response, &random, now)?;
                debug!("[mtlink] handshake: DH params verified, sending set_client_DH_params");
                Ok(Advance::Send(Pending::ClientDHRequest(step), self.pack(&request)))
            }
            Pending::ClientDHRequest(step) => {
                let response = enums::SetClientDhParamsAnswer::from_bytes(body)?;
                authentication::finish(step, response).map(Advance::Done)
            }
        }
    }

    fn pack<S: mtlink_tl::Serializable>(&mut self, request: &S) -> Vec<u8> {
        self.session.pack(request).to_plaintext_bytes()
    }

    fn resolve(&mut self, result: Result<ServerAuthentication, Error>) {
        self.spent = true;
        if let Some(tx) = self.done.take() {
            // The caller may have abandoned the future.
            let _ = tx.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Zeros;

    impl Entropy for Zeros {
        fn fill(&mut self, buf: &mut [u8]) -> Result<(), getrandom::Error> {
            buf.fill(0);
            Ok(())
        }
    }

    struct NoKeys;

    impl PublicKeyRing for NoKeys {
        fn encrypt(&self, _: &[i64], _: &[u8], _: &[u8; 224]) -> Option<(i64, Vec<u8>)> {
            None
        }
    }

    fn authenticator() -> Authenticator<Zeros> {
        Authenticator::with_entropy(Arc::new(NoKeys), Zeros)
    }

    #[test]
    fn messages_before_start_are_ignored() {
        let mut auth = authenticator();
        assert_eq!(auth.handle(&[0; 40]), None);
        assert_eq!(auth.phase(), Phase::NotStarted);
    }

    #[test]
    fn second_start_fails() {
        let mut auth = authenticator();
        let (first, _handshake) = auth.start().unwrap();
        assert_eq!(auth.phase(), Phase::PQRequest);
        // auth_key_id 0, then req_pq_multi's id after the 20-byte header
        assert_eq!(&first[..8], &[0; 8]);
        assert_eq!(&first[20..24], &0xbe7e8ef1u32.to_le_bytes());
        assert!(matches!(auth.start(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn garbage_fails_the_handshake() {
        let mut auth = authenticator();
        let (_, mut handshake) = auth.start().unwrap();
        assert_eq!(handshake.try_take(), None);

        assert_eq!(auth.handle(&[1, 2, 3]), None);
        assert_eq!(auth.phase(), Phase::NotStarted);
        assert!(matches!(handshake.try_take(), Some(Err(Error::MalformedEnvelope(_)))));
    }

    #[test]
    fn failed_authenticator_cannot_restart() {
        let mut auth = authenticator();
        let (_, mut handshake) = auth.start().unwrap();
        assert_eq!(auth.handle(&[1, 2, 3]), None);
        assert!(matches!(handshake.try_take(), Some(Err(_))));

        assert_eq!(auth.phase(), Phase::NotStarted);
        assert!(matches!(auth.start(), Err(Error::Spent)));
        assert_eq!(auth.handle(&[0; 40]), None);
    }

    #[test]
    fn aborted_authenticator_cannot_restart() {
        let mut auth = authenticator();
        let _ = auth.start().unwrap();
        auth.abort(Error::TransportClosed);
        assert!(matches!(auth.start(), Err(Error::Spent)));
    }

    #[test]
    fn abort_resolves_pending_future() {
        let mut auth = authenticator();
        let (_, mut handshake) = auth.start().unwrap();
        auth.abort(Error::TransportClosed);
        assert_eq!(auth.phase(), Phase::NotStarted);
        assert_eq!(handshake.try_take(), Some(Err(Error::TransportClosed)));
    }

    #[test]
    fn dropped_authenticator_closes_future() {
        let mut auth = authenticator();
        let (_, mut handshake) = auth.start().unwrap();
        drop(auth);
        assert_eq!(handshake.try_take(), Some(Err(Error::TransportClosed)));
    }
}
