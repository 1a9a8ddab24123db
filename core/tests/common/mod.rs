//! Shared helpers: an in-memory connector and a scripted server end

#![allow(dead_code)]

use ircbridge_core::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::{mpsc, Semaphore};

/// Long enough that only a genuinely idle link hits it (the test clock is paused)
const RECV_TIMEOUT: Duration = Duration::from_secs(3600);

/// Connector handing the server end of every new duplex pipe to the test
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<DuplexStream>,
    connects: AtomicUsize,
    /// When set, each connect waits for one `release`
    gate: Option<Semaphore>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(None)
    }

    /// Connector whose connects stay pending until the test releases them, so the
    /// `Connecting` state can be observed
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(gate: Option<Semaphore>) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sessions,
                connects: AtomicUsize::new(0),
                gate,
            }),
            rx,
        )
    }

    /// Let one pending or future connect through
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _server: &ServerConfig) -> Result<Box<dyn Transport>> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Connection("gate closed".to_string()))?
                .forget();
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.sessions
            .send(server)
            .map_err(|_| Error::Connection("test server gone".to_string()))?;
        Ok(Box::new(client))
    }
}

/// Server side of one session
pub struct FakeServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Accept the next session from the connector
    pub async fn accept(sessions: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        Self::new(sessions.recv().await.expect("connector dropped"))
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .expect("client end closed");
    }

    /// Write bytes exactly as given, terminators included
    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("client end closed");
    }

    /// Next line from the client, `None` on EOF
    pub async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("read failed");
        if read == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Next line, which must exist
    pub async fn expect_line(&mut self) -> String {
        self.recv().await.expect("client closed the link")
    }

    /// Read NICK and USER, then complete registration as `nick`
    pub async fn register(&mut self, nick: &str) {
        let nick_line = self.expect_line().await;
        assert!(nick_line.starts_with("NICK "), "unexpected {:?}", nick_line);
        let user_line = self.expect_line().await;
        assert!(user_line.starts_with("USER "), "unexpected {:?}", user_line);
        self.send(&format!(":irc.test 001 {} :Welcome to the test network", nick))
            .await;
    }

    /// Round trip a PING so everything sent before it has been handled
    pub async fn sync(&mut self, token: &str) {
        self.send(&format!("PING :{}", token)).await;
        assert_eq!(self.expect_line().await, format!("PONG :{}", token));
    }
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        name: "test".to_string(),
        host: "irc.test".to_string(),
        port: 6667,
        tls: false,
    }
}

pub fn identity(name: &str, nickname: &str, primary: bool) -> IdentityConfig {
    IdentityConfig {
        name: name.to_string(),
        nickname: nickname.to_string(),
        username: nickname.to_string(),
        realname: "Bridge Bot".to_string(),
        password: None,
        nickserv_password: None,
        primary,
    }
}

pub fn registration(nickname: &str) -> Registration {
    Registration::from_identity(&identity("main", nickname, true))
}

/// One second base delay, no keepalive
pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        keepalive: None,
    }
}
