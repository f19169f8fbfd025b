//! Pool naming. Each pool gets `id_prefix` followed by a sequence number
//! drawn from the registry that built it.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::client::Client;
use crate::config::PoolConfig;
use crate::error::ConnectionError;

/// Builds clients and hands out their pool identifiers.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    next: AtomicU64,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next identifier under `prefix`.
    pub fn next_id(&self, prefix: &str) -> String {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{sequence}")
    }

    /// Builds a client for `config`. Must be called inside a Tokio runtime.
    pub fn client(&self, config: PoolConfig) -> Result<Client, ConnectionError> {
        let id = self.next_id(&config.id_prefix);
        let client = Client::with_id(id, config)?;
        debug!(pool = %client.id(), "client registered");
        Ok(client)
    }

    /// How many identifiers this registry has handed out.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
