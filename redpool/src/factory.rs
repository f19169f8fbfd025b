//! # Connection Factory
//!
//! Purpose: Turn a [`PoolConfig`] into ready sessions for the pool. A
//! connection only counts as created once authentication (when configured)
//! and database selection have both succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cmd::Cmd;
use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::manager::Manager;

/// Pass-through options the factory understands.
pub const KNOWN_OPTIONS: [&str; 4] = ["password", "auth_pass", "username", "client_name"];

/// Opens, sets up and closes RESP connections.
#[derive(Debug, Clone)]
pub struct RespFactory {
    config: Arc<PoolConfig>,
}

impl RespFactory {
    pub fn new(config: PoolConfig) -> Self {
        let config = config.normalized();
        for key in config.options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring unrecognized connection option");
            }
        }
        RespFactory {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Runs the session setup sequence: AUTH, CLIENT SETNAME, SELECT.
    async fn setup(&self, conn: &mut Connection) -> Result<(), ConnectionError> {
        if let Some(password) = self.config.password() {
            conn.auth(self.config.username(), password).await?;
        }

        if let Some(name) = self.config.client_name() {
            let reply = conn.execute(&Cmd::new("CLIENT").arg(("SETNAME", name))).await?;
            if let Some(message) = reply.as_error() {
                return Err(ConnectionError::Setup(message));
            }
        }

        conn.select(self.config.database).await
    }
}

#[async_trait]
impl Manager for RespFactory {
    type Connection = Connection;

    async fn create(&self) -> Result<Connection, ConnectionError> {
        let address = self.config.address();
        let mut conn = Connection::connect(&address, self.config.connect_timeout_duration()).await?;
        self.setup(&mut conn).await?;
        conn.mark_ready();
        debug!(%address, database = self.config.database, "session ready");
        Ok(conn)
    }

    async fn destroy(&self, conn: Connection) {
        let address = conn.address().clone();
        if let Err(err) = conn.quit().await {
            debug!(%address, error = %err, "error while closing connection");
        }
    }

    fn has_broken(&self, conn: &Connection) -> bool {
        conn.is_broken()
    }
}
