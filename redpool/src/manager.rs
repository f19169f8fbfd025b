//! Connection lifecycle seam between the pool and whatever it pools.

use async_trait::async_trait;

use crate::error::ConnectionError;

/// Creates, destroys and health-checks pooled connections.
///
/// The pool never inspects connections itself; everything it needs to know
/// about one goes through this trait.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Opens a connection that is ready for use.
    async fn create(&self) -> Result<Self::Connection, ConnectionError>;

    /// Closes a connection. Errors are the implementation's to log.
    async fn destroy(&self, conn: Self::Connection);

    /// Returns true when `conn` must not go back to the idle set.
    fn has_broken(&self, _conn: &Self::Connection) -> bool {
        false
    }
}
