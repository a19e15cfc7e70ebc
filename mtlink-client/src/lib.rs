//! # mtlink-client
//!
//! An async MTProto connection built on tokio: Full transport framing over
//! TCP, the auth key exchange, and encrypted request/response round trips.
//!
//! ```rust,no_run
//! use mtlink_client::{Config, Connection};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), mtlink_client::InvocationError> {
//!     let mut conn = Connection::connect(&Config::default()).await?;
//!     let rtt = conn.ping().await?;
//!     println!("pong after {rtt:?}");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

mod envelope;
mod errors;
pub mod session;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mtlink_crypto::rsa::{PublicKeyRing, ServerKeys};
use mtlink_mtproto::{AuthError, Authenticator, EncryptedSession, Entropy, ServerAuthentication};
use mtlink_tl::{Deserializable, RemoteCall, Serializable, enums, functions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use envelope::Reply;

pub use errors::{InvocationError, RpcError};
pub use session::PersistedAuth;
pub use transport::FramedTransport;

/// How often one request may be sent again after the server asked for a
/// corrected resend (new salt, clock skew).
const MAX_RESENDS: usize = 3;

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Connection::connect`].
#[derive(Clone)]
pub struct Config {
    /// `host:port` of the data centre.
    pub addr:              String,
    /// Upper bound for TCP connect plus the whole key exchange.
    pub handshake_timeout: Duration,
    /// Upper bound for one request/response round trip.
    pub rpc_timeout:       Duration,
    /// Where the auth key is kept between runs. `None` disables persistence.
    pub session_path:      Option<PathBuf>,
    /// Server RSA keys used during the key exchange.
    pub keys:              Arc<dyn PublicKeyRing>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr:              "149.154.167.51:443".into(),
            handshake_timeout: Duration::from_secs(15),
            rpc_timeout:       Duration::from_secs(10),
            session_path:      Some(PathBuf::from("mtlink.session")),
            keys:              Arc::new(ServerKeys::builtin()),
        }
    }
}

impl Config {
    /// The defaults, overridden by `MTLINK_ADDR` and `MTLINK_SESSION`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Config::from_env`] with a custom variable source. An empty
    /// `MTLINK_SESSION` disables persistence.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("MTLINK_ADDR") {
            config.addr = addr;
        }
        if let Some(path) = lookup("MTLINK_SESSION") {
            config.session_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        config
    }
}

// ─── Handshake driver ─────────────────────────────────────────────────────────

/// Run `authenticator` to completion over `transport`.
///
/// Every payload the server sends is fed to the state machine and every
/// reply it produces is sent back. If the stream fails first the handshake
/// is aborted and the I/O error returned.
pub async fn authenticate<S, E>(
    transport:         &mut FramedTransport<S>,
    mut authenticator: Authenticator<E>,
) -> Result<ServerAuthentication, InvocationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: Entropy,
{
    let (first, handshake) = authenticator.start()?;
    transport.send(&first).await?;

    loop {
        let payload = match recv_payload(transport).await {
            Ok(payload) => payload,
            Err(e) => {
                authenticator.abort(AuthError::TransportClosed);
                return Err(e);
            }
        };
        match authenticator.handle(&payload) {
            Some(next) => transport.send(&next).await?,
            None => break,
        }
    }

    let auth = handshake.await?;
    tracing::info!("[mtlink] DH complete, auth key {:?}", auth.auth_key);
    Ok(auth)
}

/// Receive one payload, turning a bare 4-byte transport error into an error.
async fn recv_payload<S>(transport: &mut FramedTransport<S>) -> Result<Vec<u8>, InvocationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = transport.recv().await?;
    if payload.len() == 4 {
        let code = i32::from_le_bytes(payload[..].try_into().unwrap());
        tracing::warn!("[mtlink] server sent transport error {code}");
        return Err(InvocationError::Rpc(RpcError::from_telegram(code, "TRANSPORT_ERROR")));
    }
    Ok(payload)
}

// ─── Connection ───────────────────────────────────────────────────────────────

/// One authorised, encrypted connection to a data centre.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    transport:   FramedTransport<S>,
    session:     EncryptedSession,
    rpc_timeout: Duration,
}

impl Connection<TcpStream> {
    /// Connect over TCP, reusing the key at `config.session_path` if there
    /// is one and running the key exchange otherwise. A freshly created
    /// key is saved before this returns.
    pub async fn connect(config: &Config) -> Result<Self, InvocationError> {
        tracing::info!("[mtlink] connecting to {}", config.addr);
        let stream = timeout(config.handshake_timeout, TcpStream::connect(&config.addr))
            .await
            .map_err(|_| InvocationError::Timeout)??;
        stream.set_nodelay(true)?;

        let saved = match &config.session_path {
            Some(path) if path.exists() => Some(PersistedAuth::load(path)?),
            _ => None,
        };
        let fresh = saved.is_none();
        let conn = Self::establish(stream, saved, config).await?;

        if let (true, Some(path)) = (fresh, &config.session_path) {
            conn.persisted().save(path)?;
            tracing::info!("[mtlink] auth key saved to {}", path.display());
        }
        Ok(conn)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Set up a connection on an already open stream. With `saved` the key
    /// exchange is skipped.
    pub async fn establish(
        stream: S,
        saved:  Option<PersistedAuth>,
        config: &Config,
    ) -> Result<Self, InvocationError> {
        let mut transport = FramedTransport::new(stream);
        let auth = match saved {
            Some(saved) => {
                tracing::info!("[mtlink] reusing saved auth key");
                saved.into()
            }
            None => {
                let authenticator = Authenticator::new(Arc::clone(&config.keys));
                timeout(config.handshake_timeout, authenticate(&mut transport, authenticator))
                    .await
                    .map_err(|_| InvocationError::Timeout)??
            }
        };
        Self::from_parts(transport, auth, config.rpc_timeout)
    }

    /// Wrap a transport and a finished key exchange.
    pub fn from_parts(
        transport:   FramedTransport<S>,
        auth:        ServerAuthentication,
        rpc_timeout: Duration,
    ) -> Result<Self, InvocationError> {
        Ok(Self { transport, session: EncryptedSession::new(auth)?, rpc_timeout })
    }

    /// Send one serialized request and wait for its answer.
    pub async fn invoke_raw(&mut self, body: &[u8]) -> Result<Vec<u8>, InvocationError> {
        timeout(self.rpc_timeout, self.round_trip(body))
            .await
            .map_err(|_| InvocationError::Timeout)?
    }

    /// Send a typed request and parse its answer.
    pub async fn invoke<R: RemoteCall>(&mut self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.invoke_raw(&request.to_bytes()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Round-trip a `ping` and return how long it took.
    pub async fn ping(&mut self) -> Result<Duration, InvocationError> {
        let mut rnd = [0u8; 8];
        getrandom::getrandom(&mut rnd)?;
        let ping_id = i64::from_le_bytes(rnd);

        let started = Instant::now();
        let enums::Pong::Pong(pong) = self.invoke(&functions::Ping { ping_id }).await?;
        if pong.ping_id != ping_id {
            return Err(InvocationError::Deserialize(format!(
                "pong carries ping_id {}, sent {ping_id}",
                pong.ping_id
            )));
        }
        Ok(started.elapsed())
    }

    /// Key, clock offset and salt, ready to be saved.
    pub fn persisted(&self) -> PersistedAuth {
        PersistedAuth {
            auth_key:    self.session.auth_key().to_bytes(),
            time_offset: self.session.time_offset(),
            first_salt:  self.session.salt(),
        }
    }

    /// The encrypted session state.
    pub fn session(&self) -> &EncryptedSession { &self.session }

    async fn round_trip(&mut self, body: &[u8]) -> Result<Vec<u8>, InvocationError> {
        let mut pending = self.send(body).await?;
        let mut resends = 0;
        loop {
            let payload = recv_payload(&mut self.transport).await?;
            let message = self.session.unpack(&payload)?;
            match envelope::classify(&mut self.session, message.msg_id, &message.body, pending)? {
                Reply::Answer(answer) => return Ok(answer),
                Reply::Resend(code) if resends < MAX_RESENDS => {
                    resends += 1;
                    pending = self.send(body).await?;
                    tracing::debug!("[mtlink] resent request as {pending} after code {code}");
                }
                Reply::Resend(code) => return Err(InvocationError::BadMessage { code }),
                Reply::Ignore => {}
            }
        }
    }

    async fn send(&mut self, body: &[u8]) -> Result<i64, InvocationError> {
        let (msg_id, message) = self.session.wrap_message(body, true, None);
        let wire = self.session.encrypt(&message)?;
        self.transport.send(&wire).await?;
        tracing::trace!("[mtlink] sent msg_id {msg_id} ({} bytes)", wire.len());
        Ok(msg_id)
    }
}
