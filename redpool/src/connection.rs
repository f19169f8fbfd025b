//! # Store Connection
//!
//! Purpose: Own one live session to the store (TCP or Unix socket) and run
//! commands over it, one request/reply exchange at a time.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Each connection keeps its own encode and read buffers.
//! 2. **Pipelined Batches**: A batch is written with one `write_all` and its
//!    replies read back in order; transactions rely on this.
//! 3. **Sticky Breakage**: Any IO or framing error marks the connection
//!    broken for good. So does abandoning a request before its reply arrived,
//!    since the stream position is then unknown.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use redpool_proto::{Decoder, RespValue};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::cmd::Cmd;
use crate::config::Address;
use crate::error::ConnectionError;

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Transport is open but session setup has not finished.
    Connecting,
    /// Session is set up and usable.
    Ready,
    /// Transport can no longer be trusted.
    Broken,
}

/// One session to the store.
pub struct Connection {
    stream: Box<dyn Io>,
    read_buf: BytesMut,
    decoder: Decoder,
    write_buf: Vec<u8>,
    health: Health,
    in_flight: bool,
    address: Address,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("health", &self.health)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl Connection {
    /// Opens the transport. The session still needs setup (see `RespFactory`).
    pub async fn connect(
        address: &Address,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, ConnectionError> {
        let stream = match connect_timeout {
            Some(limit) => tokio::time::timeout(limit, open_stream(address))
                .await
                .map_err(|_| ConnectionError::ConnectTimeout(limit))??,
            None => open_stream(address).await?,
        };
        trace!(%address, "transport connected");
        Ok(Self::from_boxed(stream, address.clone()))
    }

    /// Wraps an already-open stream, e.g. an in-memory duplex in tests.
    pub fn from_stream<S>(stream: S, address: Address) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_boxed(Box::new(stream), address)
    }

    fn from_boxed(stream: Box<dyn Io>, address: Address) -> Self {
        Connection {
            stream,
            read_buf: BytesMut::with_capacity(8 * 1024),
            decoder: Decoder::new(),
            write_buf: Vec::with_capacity(256),
            health: Health::Connecting,
            in_flight: false,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// Broken, or left mid-request by a dropped caller.
    pub fn is_broken(&self) -> bool {
        self.health == Health::Broken || self.in_flight
    }

    pub(crate) fn mark_ready(&mut self) {
        if self.health == Health::Connecting {
            self.health = Health::Ready;
        }
    }

    /// Sends one command and reads its reply.
    ///
    /// Error replies from the store come back as `Ok(RespValue::Error(_))`;
    /// only transport and framing failures are `Err`.
    pub async fn execute(&mut self, cmd: &Cmd) -> Result<RespValue, ConnectionError> {
        let mut replies = self.execute_batch(std::slice::from_ref(cmd)).await?;
        replies.pop().ok_or(ConnectionError::Eof)
    }

    /// Writes all commands at once and reads one reply per command, in order.
    pub async fn execute_batch(&mut self, cmds: &[Cmd]) -> Result<Vec<RespValue>, ConnectionError> {
        if self.is_broken() {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is broken",
            )));
        }

        self.write_buf.clear();
        for cmd in cmds {
            cmd.write_to(&mut self.write_buf);
        }

        self.in_flight = true;
        match self.round_trip(cmds.len()).await {
            Ok(replies) => {
                self.in_flight = false;
                Ok(replies)
            }
            Err(err) => {
                self.health = Health::Broken;
                Err(err)
            }
        }
    }

    /// `SELECT index`; a rejection is reported as [`ConnectionError::Select`].
    pub async fn select(&mut self, database: u32) -> Result<(), ConnectionError> {
        let reply = self.execute(&Cmd::new("SELECT").arg(database)).await?;
        match reply.as_error() {
            Some(message) => Err(ConnectionError::Select { database, message }),
            None => Ok(()),
        }
    }

    /// `AUTH [username] password`.
    pub async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<(), ConnectionError> {
        let cmd = match username {
            Some(user) => Cmd::new("AUTH").arg((user, password)),
            None => Cmd::new("AUTH").arg(password),
        };
        match self.execute(&cmd).await?.as_error() {
            Some(message) => Err(ConnectionError::Auth(message)),
            None => Ok(()),
        }
    }

    /// Politely ends the session. The transport closes when `self` drops.
    pub async fn quit(mut self) -> Result<(), ConnectionError> {
        if self.is_broken() {
            return Ok(());
        }
        self.execute(&Cmd::new("QUIT")).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn round_trip(&mut self, replies: usize) -> Result<Vec<RespValue>, ConnectionError> {
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        let mut out = Vec::with_capacity(replies);
        while out.len() < replies {
            out.push(self.read_reply().await?);
        }
        Ok(out)
    }

    async fn read_reply(&mut self) -> Result<RespValue, ConnectionError> {
        loop {
            if let Some(value) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(value);
            }
            let bytes = self.stream.read_buf(&mut self.read_buf).await?;
            if bytes == 0 {
                return Err(ConnectionError::Eof);
            }
        }
    }
}

async fn open_stream(address: &Address) -> Result<Box<dyn Io>, ConnectionError> {
    match address {
        Address::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Address::Unix(_) => Err(ConnectionError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        ))),
    }
}
