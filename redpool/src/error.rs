//! # Error Types
//!
//! Three families, one per layer: establishing and leasing connections,
//! individual commands, and pinned-connection transactions. The umbrella
//! [`Error`] is what every completion channel carries.

use std::io;
use std::time::Duration;

use redpool_proto::ProtocolError;
use thiserror::Error;

/// Result type for pooled operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to establish, select, or lease a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// RESP framing error on the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Transport closed by the peer while a reply was pending.
    #[error("connection closed by server")]
    Eof,
    /// Connect did not finish within the configured timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// `AUTH` was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Session setup command other than AUTH/SELECT was rejected.
    #[error("session setup failed: {0}")]
    Setup(String),
    /// `SELECT` was rejected.
    #[error("cannot select database {database}: {message}")]
    Select { database: u32, message: String },
    /// No connection became available within the acquire timeout.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),
    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,
    /// The task running the operation went away before completing it.
    #[error("operation was abandoned before it completed")]
    Abandoned,
    /// The configuration cannot produce a working pool.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The store rejected or failed the command.
    #[error("{command} failed: {message}")]
    Server { command: String, message: String },
    /// Blank or malformed command name.
    #[error("invalid command name `{name}`")]
    Unknown { name: String },
    /// Session-state command that cannot run on a pooled connection.
    #[error("command `{name}` is not supported on a pooled client")]
    Unsupported { name: String },
}

/// Failure of a transaction as a whole.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Acquiring or using the pinned connection failed.
    #[error("transaction connection failed: {0}")]
    Connection(#[from] ConnectionError),
    /// A command was rejected while being queued; nothing was applied.
    #[error("command #{index} rejected while queueing: {message}")]
    Rejected { index: usize, message: String },
    /// The store refused to execute the batch.
    #[error("transaction aborted: {message}")]
    Aborted { message: String },
    /// A command failed while the batch executed.
    #[error("command #{index} failed inside transaction: {message}")]
    Command { index: usize, message: String },
    /// The queue held a command that cannot be dispatched.
    #[error("invalid transaction: {0}")]
    Invalid(CommandError),
}

/// Error delivered through callbacks and deferred values.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl Error {
    /// True when the failure came from the pool or transport, not the store.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Transaction(TransactionError::Connection(_))
        )
    }
}

impl ConnectionError {
    /// True when the transport can no longer be trusted.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_) | ConnectionError::Protocol(_) | ConnectionError::Eof
        )
    }
}
