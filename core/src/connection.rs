//! Connection to one IRC server
//!
//! A [`Connection`] owns a driver task that opens the transport through a [`Connector`],
//! registers, pumps lines in both directions and reconnects with backoff after any
//! failure. The driver is the only writer to the socket; callers queue lines through
//! [`Connection::send`]. State is published on a `watch` channel and everything received
//! is delivered, in order, as [`ConnectionEvent`]s.

use crate::backoff::BackoffPolicy;
use crate::buffer::{ConnectionTiming, LineBuffer};
use crate::config::{IdentityConfig, KeepaliveSettings, ServerConfig};
use crate::message::{Command, Message};
use crate::numeric::NumericReply;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 4096;
const MAX_NICK_RETRIES: usize = 5;

/// Byte stream carrying the protocol
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens transports; injected so tests can supply in-memory streams
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn Transport>>;
}

/// TCP connector with optional TLS using the platform root store
#[derive(Default)]
pub struct TcpConnector {
    tls_config: OnceLock<Arc<ClientConfig>>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self) -> Arc<ClientConfig> {
        self.tls_config
            .get_or_init(|| {
                let mut roots = RootCertStore::empty();
                let certs = rustls_native_certs::load_native_certs();
                for cert in certs.certs {
                    if let Err(e) = roots.add(cert) {
                        tracing::warn!("Failed to add root cert: {}", e);
                    }
                }
                for e in &certs.errors {
                    tracing::warn!("Error loading native certs: {}", e);
                }
                Arc::new(
                    ClientConfig::builder()
                        .with_root_certificates(roots)
                        .with_no_client_auth(),
                )
            })
            .clone()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn Transport>> {
        let stream = TcpStream::connect((server.host.as_str(), server.port)).await?;
        stream.set_nodelay(true)?;
        if !server.tls {
            return Ok(Box::new(stream));
        }

        let connector = TlsConnector::from(self.tls_config());
        let server_name = ServerName::try_from(server.host.clone())
            .map_err(|e| Error::Tls(format!("Invalid server name {}: {}", server.host, e)))?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("Handshake with {} failed: {}", server, e)))?;
        tracing::debug!(server = %server, "TLS handshake completed");
        Ok(Box::new(tls_stream))
    }
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// State plus the consecutive failure count; `attempt` resets only on `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
}

/// Delivered in arrival order on the event channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Registration completed under this nickname
    Registered { nickname: String },
    /// A parsed inbound line
    Message(Message),
    /// The link failed; a reconnect is scheduled
    Disconnected { attempt: u32, reason: String },
}

/// Identification sequence sent once the transport opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
}

impl Registration {
    pub fn from_identity(identity: &IdentityConfig) -> Self {
        Self {
            nickname: identity.nickname.clone(),
            username: identity.username.clone(),
            realname: identity.realname.clone(),
            password: identity.password.clone(),
        }
    }

    fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(3);
        if let Some(password) = &self.password {
            messages.push(Message::pass(password));
        }
        messages.push(Message::nick(&self.nickname));
        messages.push(Message::user(&self.username, &self.realname));
        messages
    }
}

/// Reconnect and keepalive behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionSettings {
    pub backoff: BackoffPolicy,
    pub keepalive: Option<KeepaliveSettings>,
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    label: String,
    server: ServerConfig,
    registration: Registration,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    status: watch::Sender<ConnectionStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    nickname: RwLock<String>,
    quit_reason: Mutex<String>,
}

/// One reconnecting link to one server
pub struct Connection {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl Connection {
    /// Create a disconnected connection; `label` names it in logs
    pub fn new(
        label: impl Into<String>,
        server: ServerConfig,
        registration: Registration,
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let nickname = RwLock::new(registration.nickname.clone());
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                server,
                registration,
                settings,
                connector,
                status,
                outbound: Mutex::new(None),
                nickname,
                quit_reason: Mutex::new("Leaving".to_string()),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Start the driver task; events are sent to `events` until the connection is
    /// disconnected
    pub fn connect(&self, events: mpsc::UnboundedSender<ConnectionEvent>) -> Result<()> {
        let mut driver = self.driver.lock();
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return Err(Error::Connection(format!(
                "{} is already connected",
                self.shared.server
            )));
        }

        self.shared.set_status(ConnectionState::Connecting, 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&self.shared), events, cancel.clone()));
        *driver = Some(Driver { cancel, task });
        Ok(())
    }

    /// Stop the connection: cancel any pending reconnect, send QUIT if the link is up and
    /// wait for the driver to finish. Calling it again is a no-op.
    pub async fn disconnect(&self, reason: &str) {
        let driver = self.driver.lock().take();
        let Some(driver) = driver else {
            return;
        };

        *self.shared.quit_reason.lock() = reason.to_string();
        driver.cancel.cancel();
        if let Err(e) = driver.task.await {
            tracing::warn!(bot = %self.shared.label, "Connection driver ended abnormally: {}", e);
        }
    }

    /// Queue one line (no terminator) for the server
    pub fn send(&self, line: &str) -> Result<()> {
        if self.state() != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        if line.contains(['\r', '\n']) {
            return Err(Error::MalformedMessage(format!(
                "outbound line contains a terminator: {:?}",
                line
            )));
        }

        let outbound = self.shared.outbound.lock();
        let sender = outbound.as_ref().ok_or(Error::NotConnected)?;
        sender.send(line.to_string()).map_err(|_| Error::NotConnected)
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn attempt(&self) -> u32 {
        self.status().attempt
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Nickname the server currently knows us by
    pub fn nickname(&self) -> String {
        self.shared.nickname.read().clone()
    }

    pub fn server(&self) -> &ServerConfig {
        &self.shared.server
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.cancel.cancel();
        }
    }
}

impl Shared {
    fn set_status(&self, state: ConnectionState, attempt: u32) {
        let previous = self.status.send_replace(ConnectionStatus { state, attempt });
        if previous.state != state {
            tracing::info!(
                bot = %self.label,
                server = %self.server,
                attempt,
                "Connection state {} -> {}",
                previous.state,
                state
            );
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    async fn write_line<W>(&self, writer: &mut W, line: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(bot = %self.label, server = %self.server, ">> {}", redact(line));
        let mut data = String::with_capacity(line.len() + 2);
        data.push_str(line);
        data.push_str("\r\n");
        writer.write_all(data.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// One transport session; returns `Ok` only when cancelled
    async fn session(
        &self,
        events: &mpsc::UnboundedSender<ConnectionEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let transport = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = self.connector.connect(&self.server) => result?,
        };
        self.set_status(ConnectionState::Authenticating, self.status().attempt);

        let (mut reader, mut writer) = tokio::io::split(transport);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(outbound_tx);
        *self.nickname.write() = self.registration.nickname.clone();

        for msg in self.registration.messages() {
            self.write_line(&mut writer, &msg.to_line()).await?;
        }

        let keepalive = self.settings.keepalive;
        let mut timing = keepalive
            .map(|k| ConnectionTiming::new(k.ping_interval, k.timeout))
            .unwrap_or_else(|| ConnectionTiming::new(Duration::MAX, Duration::MAX));
        let tick = keepalive
            .map(|k| (k.ping_interval / 4).max(Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(60));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buffer = LineBuffer::default();
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut nick_retries = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.status().state == ConnectionState::Ready {
                        let reason = self.quit_reason.lock().clone();
                        if let Err(e) = self.write_line(&mut writer, &Message::quit(&reason).to_line()).await {
                            tracing::debug!(bot = %self.label, "Failed to send QUIT: {}", e);
                        }
                    }
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
                read = reader.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        return Err(Error::Connection("connection closed by server".to_string()));
                    }
                    timing.update_activity();
                    buffer.append(&chunk[..n]);
                    for line in buffer.extract_lines() {
                        tracing::debug!(bot = %self.label, server = %self.server, "<< {}", line);
                        match Message::parse(&line) {
                            Ok(msg) => {
                                self.handle_inbound(msg, &mut writer, events, &mut nick_retries).await?
                            }
                            Err(e) => {
                                tracing::warn!(bot = %self.label, server = %self.server, "Discarding line: {}", e)
                            }
                        }
                    }
                }
                Some(line) = outbound_rx.recv() => {
                    self.write_line(&mut writer, &line).await?;
                }
                _ = ticker.tick(), if keepalive.is_some() => {
                    if timing.is_timed_out() {
                        return Err(Error::Connection(format!(
                            "no data received for {:?}",
                            timing.time_since_activity()
                        )));
                    }
                    if timing.should_send_ping() {
                        self.write_line(&mut writer, &Message::ping(&self.server.host).to_line()).await?;
                        timing.record_ping_sent();
                    }
                }
            }
        }
    }

    async fn handle_inbound<W>(
        &self,
        msg: Message,
        writer: &mut W,
        events: &mpsc::UnboundedSender<ConnectionEvent>,
        nick_retries: &mut usize,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match &msg.command {
            Command::Ping => {
                let token = msg.arg(0).unwrap_or_default();
                self.write_line(writer, &Message::pong(token).to_line()).await?;
            }
            Command::Error => {
                return Err(Error::Connection(format!(
                    "server closed the link: {}",
                    msg.arg(0).unwrap_or_default()
                )));
            }
            Command::Nick => {
                let current = self.nickname.read().clone();
                if let (Some(old), Some(new)) = (msg.source_nick(), msg.arg(0)) {
                    if old.eq_ignore_ascii_case(&current) {
                        *self.nickname.write() = new.to_string();
                    }
                }
            }
            Command::Numeric(_) => match msg.numeric_reply() {
                Some(NumericReply::RplWelcome) => {
                    let nickname = msg
                        .params
                        .first()
                        .cloned()
                        .unwrap_or_else(|| self.nickname.read().clone());
                    *self.nickname.write() = nickname.clone();
                    self.set_status(ConnectionState::Ready, 0);
                    let _ = events.send(ConnectionEvent::Registered { nickname });
                }
                Some(reply) if reply.is_fatal() => {
                    return Err(Error::Connection(format!(
                        "registration refused ({}): {}",
                        reply.code(),
                        msg.trailing.as_deref().unwrap_or_default()
                    )));
                }
                Some(reply)
                    if reply.is_nick_rejection()
                        && self.status().state == ConnectionState::Authenticating =>
                {
                    *nick_retries += 1;
                    if *nick_retries > MAX_NICK_RETRIES {
                        return Err(Error::Connection(
                            "no acceptable nickname after retries".to_string(),
                        ));
                    }
                    let next = format!("{}_", self.nickname.read());
                    tracing::info!(bot = %self.label, "Nickname rejected ({}), trying {}", reply.code(), next);
                    *self.nickname.write() = next.clone();
                    self.write_line(writer, &Message::nick(&next).to_line()).await?;
                }
                _ => {}
            },
            _ => {}
        }

        let _ = events.send(ConnectionEvent::Message(msg));
        Ok(())
    }
}

/// Driver task: session, backoff, repeat until cancelled
async fn run(
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
) {
    loop {
        shared.set_status(ConnectionState::Connecting, shared.status().attempt);
        let result = shared.session(&events, &cancel).await;
        shared.outbound.lock().take();
        if cancel.is_cancelled() {
            break;
        }

        let reason = match result {
            Ok(()) => "session ended".to_string(),
            Err(e) => e.to_string(),
        };
        let previous = shared.status().attempt;
        let delay = shared.settings.backoff.delay_for_attempt(previous);
        let attempt = previous.saturating_add(1);
        shared.set_status(ConnectionState::Disconnected, attempt);
        tracing::warn!(
            bot = %shared.label,
            server = %shared.server,
            attempt,
            "Connection lost: {}; reconnecting in {:?}",
            reason,
            delay
        );
        let _ = events.send(ConnectionEvent::Disconnected { attempt, reason });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_status(ConnectionState::Disconnected, shared.status().attempt);
    tracing::info!(bot = %shared.label, server = %shared.server, "Connection closed");
}

/// Hide credentials in traffic logs
fn redact(line: &str) -> Cow<'_, str> {
    if line.starts_with("PASS ") {
        return Cow::Borrowed("PASS ****");
    }
    match line.find(":IDENTIFY ") {
        Some(pos) => Cow::Owned(format!("{}IDENTIFY ****", &line[..pos + 1])),
        None => Cow::Borrowed(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_sequence() {
        let registration = Registration {
            nickname: "bridge".to_string(),
            username: "br".to_string(),
            realname: "Bridge Bot".to_string(),
            password: Some("secret".to_string()),
        };
        let lines: Vec<String> = registration.messages().iter().map(Message::to_line).collect();
        assert_eq!(lines, vec!["PASS secret", "NICK bridge", "USER br 0 * :Bridge Bot"]);

        let registration = Registration {
            password: None,
            ..registration
        };
        assert_eq!(registration.messages().len(), 2);
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("PASS hunter2"), "PASS ****");
        assert_eq!(
            redact("PRIVMSG NickServ :IDENTIFY hunter2"),
            "PRIVMSG NickServ :IDENTIFY ****"
        );
        assert_eq!(redact("NICK bridge"), "NICK bridge");
    }

    #[test]
    fn test_send_requires_ready() {
        let connection = Connection::new(
            "test",
            ServerConfig {
                name: "local".to_string(),
                host: "127.0.0.1".to_string(),
                port: 6667,
                tls: false,
            },
            Registration {
                nickname: "bridge".to_string(),
                username: "bridge".to_string(),
                realname: "Bridge".to_string(),
                password: None,
            },
            ConnectionSettings::default(),
            Arc::new(TcpConnector::new()),
        );
        assert_eq!(connection.status(), ConnectionStatus::default());
        assert!(matches!(connection.send("PRIVMSG #a :hi"), Err(Error::NotConnected)));
    }
}
