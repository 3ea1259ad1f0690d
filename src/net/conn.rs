//! Connections to endorsing peers and the pool that hands them out.

use super::frame::{read_frame, response_from_frame, write_frame};
use super::{NetError, RpcCode, RpcStatus, TlsSettings};
use crate::timeouts::{
    CONNECTION_POOL_IDLE_TIMEOUT, CONNECTION_POOL_MAX_IDLE_PER_TARGET, MAX_CALL_RECV_MSG_SIZE,
    MAX_CALL_SEND_MSG_SIZE,
};
use crate::util::PinFuture;
use log::{debug, info};
use parking_lot::Mutex;
use rustls::client::ServerName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Byte stream a [`Connection`] can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

#[derive(Debug, Error)]
pub enum DialError {
    /// The transport refused the connection with a structured status.
    #[error("dial failed: {0}")]
    Status(RpcStatus),
    #[error(transparent)]
    Net(#[from] NetError),
}

impl From<std::io::Error> for DialError {
    fn from(err: std::io::Error) -> Self {
        DialError::Net(NetError::Io(err))
    }
}

#[derive(Clone, Debug)]
pub struct DialOptions {
    /// `None` dials plaintext.
    pub tls: Option<TlsSettings>,
    pub max_send_msg_size: usize,
    pub max_recv_msg_size: usize,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            tls: None,
            max_send_msg_size: MAX_CALL_SEND_MSG_SIZE,
            max_recv_msg_size: MAX_CALL_RECV_MSG_SIZE,
        }
    }
}

/// Transport security a connection was established with. Pooled
/// connections are only handed to dials asking for the same.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Security {
    Plaintext,
    Tls {
        /// Address of the shared client config; the TLS session keeps the
        /// config alive, so the address is stable while the connection is.
        config: usize,
        server_name: ServerName,
    },
}

impl Security {
    fn of(options: &DialOptions) -> Self {
        match &options.tls {
            Some(tls) => Security::Tls {
                config: Arc::as_ptr(&tls.config) as usize,
                server_name: tls.server_name.clone(),
            },
            None => Security::Plaintext,
        }
    }
}

/// One framed request/response channel to a peer.
pub struct Connection {
    target: String,
    security: Security,
    stream: Box<dyn Stream>,
    max_send: usize,
    max_recv: usize,
    broken: bool,
}

impl Connection {
    pub fn new(target: impl Into<String>, stream: impl Stream + 'static) -> Self {
        Self {
            target: target.into(),
            security: Security::Plaintext,
            stream: Box::new(stream),
            max_send: MAX_CALL_SEND_MSG_SIZE,
            max_recv: MAX_CALL_RECV_MSG_SIZE,
            broken: false,
        }
    }

    pub fn with_limits(mut self, max_send: usize, max_recv: usize) -> Self {
        self.max_send = max_send;
        self.max_recv = max_recv;
        self
    }

    fn with_security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// A broken connection has an unknown stream position and must not be
    /// reused.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends one request frame and waits for its response.
    ///
    /// The connection stays marked broken while a call is in flight, so a
    /// call abandoned at a deadline is never returned to the pool.
    pub async fn call(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>, RpcStatus> {
        if self.broken {
            return Err(RpcStatus::new(
                RpcCode::Unavailable,
                format!("connection to {} is broken", self.target),
            ));
        }
        if payload.len() > self.max_send {
            return Err(RpcStatus::new(
                RpcCode::ResourceExhausted,
                format!(
                    "trying to send message larger than max ({} vs. {})",
                    payload.len(),
                    self.max_send
                ),
            ));
        }
        self.broken = true;
        write_frame(&mut self.stream, opcode, payload, self.max_send)
            .await
            .map_err(|err| err.to_status())?;
        let (status, body) = read_frame(&mut self.stream, self.max_recv)
            .await
            .map_err(|err| err.to_status())?;
        self.broken = false;
        response_from_frame(status, body)
    }
}

/// Source of connections shared by every endorsement client.
pub trait ConnectionManager: Send + Sync {
    fn dial<'a>(
        &'a self,
        target: &'a str,
        options: &'a DialOptions,
    ) -> PinFuture<'a, Result<Connection, DialError>>;

    /// Hands a connection back once the caller is done with it.
    fn release(&self, conn: Connection);
}

/// Scoped acquisition: the connection goes back to its manager when the
/// lease is dropped.
pub struct ConnectionLease {
    manager: Arc<dyn ConnectionManager>,
    conn: Option<Connection>,
}

impl ConnectionLease {
    pub fn new(manager: Arc<dyn ConnectionManager>, conn: Connection) -> Self {
        Self {
            manager,
            conn: Some(conn),
        }
    }

    pub async fn call(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>, RpcStatus> {
        match self.conn.as_mut() {
            Some(conn) => conn.call(opcode, payload).await,
            None => Err(RpcStatus::new(
                RpcCode::Internal,
                "connection already released",
            )),
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.manager.release(conn);
        }
    }
}

struct IdleConnection {
    conn: Connection,
    last_used: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub idle: usize,
    pub connects: u64,
    pub reuses: u64,
}

type PoolKey = (String, Security);

/// Keeps idle connections per target and transport security, and dials TCP
/// (optionally TLS) when none is available.
pub struct PooledConnectionManager {
    idle: Mutex<HashMap<PoolKey, Vec<IdleConnection>>>,
    idle_timeout: Duration,
    max_idle_per_target: usize,
    connects: AtomicU64,
    reuses: AtomicU64,
}

impl Default for PooledConnectionManager {
    fn default() -> Self {
        Self::new(CONNECTION_POOL_IDLE_TIMEOUT, CONNECTION_POOL_MAX_IDLE_PER_TARGET)
    }
}

impl PooledConnectionManager {
    pub fn new(idle_timeout: Duration, max_idle_per_target: usize) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            idle_timeout: idle_timeout.max(Duration::from_millis(1)),
            max_idle_per_target: max_idle_per_target.max(1),
            connects: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let idle = self.idle.lock();
        PoolSnapshot {
            idle: idle.values().map(Vec::len).sum(),
            connects: self.connects.load(Ordering::SeqCst),
            reuses: self.reuses.load(Ordering::SeqCst),
        }
    }

    fn checkout_idle(&self, key: &PoolKey, now: Instant) -> Option<Connection> {
        let mut idle = self.idle.lock();
        let entries = idle.get_mut(key)?;
        let idle_timeout = self.idle_timeout;
        entries.retain(|entry| now.saturating_duration_since(entry.last_used) <= idle_timeout);
        let conn = entries.pop().map(|entry| entry.conn);
        if entries.is_empty() {
            idle.remove(key);
        }
        conn
    }

    async fn connect(&self, target: &str, options: &DialOptions) -> Result<Connection, DialError> {
        let stream = TcpStream::connect(target).await?;
        stream.set_nodelay(true).ok();
        let conn = match &options.tls {
            Some(tls) => {
                let connector = TlsConnector::from(tls.config.clone());
                let tls_stream = connector
                    .connect(tls.server_name.clone(), stream)
                    .await?;
                Connection::new(target, tls_stream)
            }
            None => Connection::new(target, stream),
        };
        info!(
            "event=conn_pool_connect target={} secured={}",
            target,
            options.tls.is_some()
        );
        Ok(conn
            .with_security(Security::of(options))
            .with_limits(options.max_send_msg_size, options.max_recv_msg_size))
    }
}

impl ConnectionManager for PooledConnectionManager {
    fn dial<'a>(
        &'a self,
        target: &'a str,
        options: &'a DialOptions,
    ) -> PinFuture<'a, Result<Connection, DialError>> {
        Box::pin(async move {
            let key = (target.to_string(), Security::of(options));
            if let Some(conn) = self.checkout_idle(&key, Instant::now()) {
                self.reuses.fetch_add(1, Ordering::SeqCst);
                debug!("event=conn_pool_reuse target={}", target);
                return Ok(conn.with_limits(options.max_send_msg_size, options.max_recv_msg_size));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connect(target, options).await
        })
    }

    fn release(&self, conn: Connection) {
        if conn.is_broken() {
            debug!("event=conn_pool_drop_broken target={}", conn.target());
            return;
        }
        let mut idle = self.idle.lock();
        let key = (conn.target().to_string(), conn.security.clone());
        let entries = idle.entry(key).or_default();
        if entries.len() < self.max_idle_per_target {
            entries.push(IdleConnection {
                conn,
                last_used: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::{write_status, OP_PROCESS_PROPOSAL, STATUS_OK};
    use tokio::io::DuplexStream;

    async fn echo_once(mut server: DuplexStream) -> DuplexStream {
        let (_, payload) = read_frame(&mut server, 1024).await.unwrap();
        write_frame(&mut server, STATUS_OK, &payload, 1024).await.unwrap();
        server
    }

    #[tokio::test]
    async fn call_round_trips_and_reports_remote_status() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new("peer0:7051", client);
        let server = tokio::spawn(echo_once(server));
        assert_eq!(conn.call(OP_PROCESS_PROPOSAL, b"ping").await.unwrap(), b"ping");
        assert!(!conn.is_broken());

        let mut server = server.await.unwrap();
        let remote = tokio::spawn(async move {
            read_frame(&mut server, 1024).await.unwrap();
            let status = RpcStatus::new(RpcCode::Unknown, "chaincode error");
            write_status(&mut server, &status, 1024).await.unwrap();
            server
        });
        let err = conn.call(OP_PROCESS_PROPOSAL, b"ping").await.unwrap_err();
        assert_eq!(err.code, RpcCode::Unknown);
        assert!(!conn.is_broken());
        drop(remote.await.unwrap());

        let err = conn.call(OP_PROCESS_PROPOSAL, b"ping").await.unwrap_err();
        assert_eq!(err.code, RpcCode::Unavailable);
        assert!(conn.is_broken());
    }

    #[tokio::test]
    async fn send_limit_is_enforced_before_writing() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = Connection::new("peer0:7051", client).with_limits(8, 8);
        let err = conn.call(OP_PROCESS_PROPOSAL, &[0u8; 9]).await.unwrap_err();
        assert_eq!(err.code, RpcCode::ResourceExhausted);
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn pool_keeps_healthy_connections_and_drops_broken_ones() {
        let pool = Arc::new(PooledConnectionManager::default());
        let (client, _server) = tokio::io::duplex(64);
        pool.release(Connection::new("peer0:7051", client));
        assert_eq!(pool.snapshot().idle, 1);

        let options = DialOptions::default();
        let conn = pool.dial("peer0:7051", &options).await.unwrap();
        assert_eq!(pool.snapshot().reuses, 1);
        assert_eq!(pool.snapshot().idle, 0);

        let manager: Arc<dyn ConnectionManager> = pool.clone();
        let mut lease = ConnectionLease::new(manager, conn);
        drop(_server);
        assert!(lease.call(OP_PROCESS_PROPOSAL, b"x").await.is_err());
        drop(lease);
        assert_eq!(pool.snapshot().idle, 0);
    }

    fn tls_options() -> DialOptions {
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        DialOptions {
            tls: Some(TlsSettings {
                config: Arc::new(config),
                server_name: ServerName::try_from("peer0").unwrap(),
            }),
            ..DialOptions::default()
        }
    }

    #[tokio::test]
    async fn pooled_connections_are_only_reused_with_matching_security() {
        // Nothing listens here, so a dial that skips the pool fails.
        let target = "127.0.0.1:1";
        let pool = PooledConnectionManager::default();
        let (plain, _plain_server) = tokio::io::duplex(64);
        pool.release(Connection::new(target, plain));

        let secured = tls_options();
        assert!(pool.dial(target, &secured).await.is_err());
        assert_eq!(pool.snapshot().reuses, 0);
        assert_eq!(pool.snapshot().idle, 1);

        let (tls, _tls_server) = tokio::io::duplex(64);
        pool.release(Connection::new(target, tls).with_security(Security::of(&secured)));
        assert_eq!(pool.snapshot().idle, 2);

        let other_ca = tls_options();
        assert!(pool.dial(target, &other_ca).await.is_err());
        assert_eq!(pool.snapshot().reuses, 0);

        let conn = pool.dial(target, &secured).await.unwrap();
        assert_eq!(conn.security, Security::of(&secured));
        let conn = pool.dial(target, &DialOptions::default()).await.unwrap();
        assert_eq!(conn.security, Security::Plaintext);
        assert_eq!(pool.snapshot().reuses, 2);
        assert_eq!(pool.snapshot().idle, 0);
    }

    #[tokio::test]
    async fn idle_connections_expire() {
        let pool = PooledConnectionManager::new(Duration::from_millis(1), 4);
        let (client, _server) = tokio::io::duplex(64);
        pool.release(Connection::new("peer0:7051", client));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let key = ("peer0:7051".to_string(), Security::Plaintext);
        assert!(pool.checkout_idle(&key, Instant::now()).is_none());
    }
}
