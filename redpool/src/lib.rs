//! # redpool
//!
//! Purpose: A bounded pool of connections to a Redis-compatible store, with
//! every command available as a callback or a deferred value and
//! transactions pinned to one connection for their whole run.
//!
//! ## Design Principles
//! 1. **Layered**: codec (`redpool-proto`) → [`Connection`] → [`Pool`] →
//!    [`Client`] / [`Transaction`].
//! 2. **Generic Pool**: [`Pool`] only knows the [`Manager`] trait;
//!    [`RespFactory`] is the store-specific implementation.
//! 3. **Explicit State**: Pool identifiers come from a [`PoolRegistry`] the
//!    caller owns.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use redpool::{PoolConfig, PoolRegistry};
//!
//! let registry = PoolRegistry::new();
//! let client = registry.client(PoolConfig::new().max_connections(8))?;
//!
//! client.set(("greeting", "hello")).await?;
//! let value = client.get("greeting").await?;
//! assert_eq!(value, "hello");
//!
//! let results = client.multi().incr("hits").incr("hits").exec().await?;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cmd;
pub mod commands;
pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod transaction;

pub use client::Client;
pub use cmd::{cmd, Cmd, ToArgs};
pub use completion::{Callback, Deferred};
pub use config::{Address, PoolConfig};
pub use connection::{Connection, Health};
pub use error::{CommandError, ConnectionError, Error, Result, TransactionError};
pub use factory::RespFactory;
pub use manager::Manager;
pub use pool::{Lease, Pool, PoolOptions, PoolStatus};
pub use redpool_proto::{RespValue, Value};
pub use registry::PoolRegistry;
pub use transaction::Transaction;
