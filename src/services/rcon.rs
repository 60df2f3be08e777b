//! Source-style RCON client used to talk to a running dedicated server.
//!
//! # Wire format
//!
//! Every packet is little-endian:
//!
//! ```text
//! i32 size        byte count of everything after this field (body length + 10)
//! i32 request id  caller-assigned; the server answers auth failures with -1
//! i32 type        3 = auth, 2 = exec command (also the auth response type)
//! [u8] body       UTF-8 text
//! u8, u8          two NUL terminators
//! ```
//!
//! Only one request is ever outstanding on a session, so responses are not
//! matched against request ids.

use crate::models::InstanceConfig;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Packet type for authentication requests
pub const SERVERDATA_AUTH: i32 = 3;

/// Packet type for command execution
pub const SERVERDATA_EXECCOMMAND: i32 = 2;

/// Timeout for establishing the TCP connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for receiving a full response packet
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of the fixed header block read before the body (size, id, type)
pub const HEADER_LEN: usize = 12;

const AUTH_REQUEST_ID: i32 = 1;
const COMMAND_REQUEST_ID: i32 = 100;
const READ_CHUNK: usize = 4096;

/// One attempt plus one automatic reconnect-and-retry
const MAX_EXECUTE_ATTEMPTS: usize = 2;

/// Errors that can occur while talking to the RCON endpoint
#[derive(Error, Debug)]
pub enum RconError {
    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Authentication rejected by {0}")]
    AuthRejected(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Value of the size field for this packet (body length + 10)
    pub fn size_field(&self) -> i32 {
        self.body.len() as i32 + 10
    }

    /// Encode the packet into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len() + 2);
        bytes.extend_from_slice(&self.size_field().to_le_bytes());
        bytes.extend_from_slice(&self.id.to_le_bytes());
        bytes.extend_from_slice(&self.kind.to_le_bytes());
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    /// Decode a complete packet from a byte slice.
    ///
    /// The body is whatever follows the header up to `size - 8` bytes, with
    /// NUL terminators stripped.
    pub fn decode(bytes: &[u8]) -> Result<Self, RconError> {
        if bytes.len() < HEADER_LEN {
            return Err(RconError::MalformedPacket(format!(
                "expected at least {} header bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }

        let (size, id, kind) = parse_header(&bytes[..HEADER_LEN]);
        let body_len = body_len(size);
        let available = &bytes[HEADER_LEN..];
        let body = &available[..body_len.min(available.len())];

        Ok(Self {
            id,
            kind,
            body: decode_body(body),
        })
    }
}

fn parse_header(header: &[u8]) -> (i32, i32, i32) {
    let field = |offset: usize| {
        i32::from_le_bytes([
            header[offset],
            header[offset + 1],
            header[offset + 2],
            header[offset + 3],
        ])
    };
    (field(0), field(4), field(8))
}

/// Body length implied by a size field: size minus the id and type fields
fn body_len(size: i32) -> usize {
    usize::try_from(size.saturating_sub(8)).unwrap_or(0)
}

fn decode_body(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_matches('\0').to_string()
}

/// Write a packet to the transport.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), RconError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one packet from the transport.
///
/// The 12-byte header is read as a block, then the body is accumulated until
/// exactly `size - 8` bytes have arrived. Transport reads may return fewer
/// bytes than requested, so the loop is length-driven. If the peer closes the
/// stream mid-body, the bytes received so far are returned.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, RconError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RconError::MalformedPacket("incomplete header".to_string())
        } else {
            RconError::Io(e)
        }
    })?;

    let (size, id, kind) = parse_header(&header);
    let expected = body_len(size);

    let mut data = Vec::with_capacity(expected);
    let mut chunk = [0u8; READ_CHUNK];
    while data.len() < expected {
        let want = (expected - data.len()).min(READ_CHUNK);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            tracing::debug!(
                "RCON peer closed stream after {} of {} body bytes",
                data.len(),
                expected
            );
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }

    Ok(Packet {
        id,
        kind,
        body: decode_body(&data),
    })
}

/// Observable state of an RCON session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    AwaitingResponse,
}

enum Session {
    Disconnected,
    Connected(TcpStream),
    AwaitingResponse(TcpStream),
}

/// A player reported by the `players` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
}

/// Parse the response of the `players` command.
///
/// Expected format:
///
/// ```text
/// Players connected (2):
/// -Alice
/// - Bob
/// ```
///
/// Bullets (`-` or `*`) are optional; blank lines and the header are skipped.
pub fn parse_players(raw: &str) -> Vec<Player> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("Players connected"))
        .filter_map(|line| {
            let name = line
                .strip_prefix('-')
                .or_else(|| line.strip_prefix('*'))
                .unwrap_or(line)
                .trim();
            (!name.is_empty()).then(|| Player {
                name: name.to_string(),
            })
        })
        .collect()
}

/// Console operations the restart scheduler needs.
///
/// Implemented by [`RconClient`]; tests substitute a recording fake.
#[allow(async_fn_in_trait)]
pub trait RemoteConsole {
    /// Open and authenticate a session. Returns false on any failure.
    async fn connect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Broadcast a server message to all players.
    async fn broadcast(&mut self, message: &str);

    /// Ask the server to shut down and save.
    async fn quit(&mut self);

    /// Drop the session.
    fn disconnect(&mut self);
}

/// RCON client holding at most one session.
///
/// Not safe for concurrent use; every operation takes `&mut self` so at most
/// one command is in flight.
pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    session: Session,
}

impl RconClient {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            session: Session::Disconnected,
        }
    }

    pub fn from_config(config: &InstanceConfig) -> Self {
        Self::new(&config.rcon_host, config.rcon_port, &config.rcon_password)
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Session::Disconnected => SessionState::Disconnected,
            Session::Connected(_) => SessionState::Connected,
            Session::AwaitingResponse(_) => SessionState::AwaitingResponse,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect and authenticate.
    ///
    /// Fails closed: on a transport or auth error the session is discarded
    /// and `false` is returned.
    pub async fn connect(&mut self) -> bool {
        self.session = Session::Disconnected;
        match self.open().await {
            Ok(stream) => {
                tracing::debug!("RCON connected to {}", self.endpoint());
                self.session = Session::Connected(stream);
                true
            }
            Err(e) => {
                tracing::warn!("RCON connection to {} failed: {}", self.endpoint(), e);
                false
            }
        }
    }

    async fn open(&self) -> Result<TcpStream, RconError> {
        let endpoint = self.endpoint();
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| RconError::Timeout("connecting"))??;

        write_packet(
            &mut stream,
            &Packet::new(AUTH_REQUEST_ID, SERVERDATA_AUTH, self.password.as_str()),
        )
        .await?;

        let response = timeout(RECEIVE_TIMEOUT, read_packet(&mut stream))
            .await
            .map_err(|_| RconError::Timeout("waiting for auth response"))??;

        if response.id < 0 {
            return Err(RconError::AuthRejected(endpoint));
        }
        Ok(stream)
    }

    /// Take the live stream out of the session, connecting if necessary.
    ///
    /// A session still awaiting a response belongs to an interrupted
    /// exchange; its stream may hold a stale reply, so it is replaced.
    async fn take_stream(&mut self) -> Result<TcpStream, RconError> {
        match std::mem::replace(&mut self.session, Session::Disconnected) {
            Session::Connected(stream) => Ok(stream),
            Session::AwaitingResponse(_) => {
                tracing::debug!("Discarding RCON session with a pending response");
                self.open().await
            }
            Session::Disconnected => self.open().await,
        }
    }

    /// Execute a command and return the response text.
    ///
    /// On a transport failure the session is reopened and the command retried
    /// exactly once. If that fails too, an empty string is returned, which
    /// callers must read as "unknown" rather than as an empty reply.
    pub async fn execute(&mut self, command: &str) -> String {
        for attempt in 1..=MAX_EXECUTE_ATTEMPTS {
            match self.try_execute(command).await {
                Ok(response) => return response,
                Err(e) if attempt < MAX_EXECUTE_ATTEMPTS => {
                    tracing::warn!("RCON connection lost ({}), reconnecting...", e);
                }
                Err(e) => {
                    tracing::warn!("RCON command failed after retry: {}", e);
                }
            }
        }
        String::new()
    }

    async fn try_execute(&mut self, command: &str) -> Result<String, RconError> {
        let stream = self.take_stream().await?;
        self.session = Session::AwaitingResponse(stream);

        let packet = Packet::new(COMMAND_REQUEST_ID, SERVERDATA_EXECCOMMAND, command);
        let result = self.exchange(&packet).await;

        // Back to Connected only when the exchange completed.
        if let Session::AwaitingResponse(stream) =
            std::mem::replace(&mut self.session, Session::Disconnected)
        {
            if result.is_ok() {
                self.session = Session::Connected(stream);
            }
        }
        result.map(|response| response.body)
    }

    async fn exchange(&mut self, packet: &Packet) -> Result<Packet, RconError> {
        let Session::AwaitingResponse(stream) = &mut self.session else {
            return Err(RconError::MalformedPacket(
                "no session awaiting a response".to_string(),
            ));
        };
        write_packet(stream, packet).await?;
        timeout(RECEIVE_TIMEOUT, read_packet(stream))
            .await
            .map_err(|_| RconError::Timeout("waiting for command response"))?
    }

    /// Send a command without reading a response.
    pub async fn send(&mut self, command: &str) -> bool {
        let mut stream = match self.take_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("RCON send of '{}' skipped: {}", command, e);
                return false;
            }
        };

        let packet = Packet::new(COMMAND_REQUEST_ID, SERVERDATA_EXECCOMMAND, command);
        match write_packet(&mut stream, &packet).await {
            Ok(()) => {
                self.session = Session::Connected(stream);
                true
            }
            Err(e) => {
                tracing::warn!("RCON send of '{}' failed: {}", command, e);
                false
            }
        }
    }

    /// Drop the current session, if any.
    pub fn disconnect(&mut self) {
        self.session = Session::Disconnected;
    }

    /// List connected players.
    pub async fn list_players(&mut self) -> Vec<Player> {
        let raw = self.execute("players").await;
        parse_players(&raw)
    }

    /// Whether the `admin` account is currently connected.
    pub async fn is_admin_online(&mut self) -> bool {
        self.list_players()
            .await
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case("admin"))
    }

    pub async fn kick(&mut self, user: &str, reason: &str) -> String {
        self.execute(&format!(
            "kickuser \"{}\" -r \"{}\"",
            quote_safe(user),
            quote_safe(reason)
        ))
        .await
    }

    pub async fn ban(&mut self, user: &str, reason: &str) -> String {
        self.execute(&format!(
            "banuser \"{}\" -r \"{}\"",
            quote_safe(user),
            quote_safe(reason)
        ))
        .await
    }

    pub async fn broadcast(&mut self, message: &str) -> String {
        self.execute(&format!("servermsg \"{}\"", quote_safe(message)))
            .await
    }

    /// Shut the server down, then request a save. Neither response is read.
    pub async fn quit(&mut self) {
        self.send("quit").await;
        self.send("save").await;
    }
}

/// Replace double quotes so an argument can't terminate its quoted field.
fn quote_safe(text: &str) -> String {
    text.replace('"', "'")
}

impl RemoteConsole for RconClient {
    async fn connect(&mut self) -> bool {
        RconClient::connect(self).await
    }

    fn is_connected(&self) -> bool {
        self.state() != SessionState::Disconnected
    }

    async fn broadcast(&mut self, message: &str) {
        RconClient::broadcast(self, message).await;
    }

    async fn quit(&mut self) {
        RconClient::quit(self).await;
    }

    fn disconnect(&mut self) {
        RconClient::disconnect(self);
    }
}
