//! # Pooled Client
//!
//! Purpose: Expose every table command as a dual-mode operation over a
//! connection pool. Each call leases a connection, runs one command, returns
//! the connection and then delivers the reply.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, setup and the protocol.
//! 2. **Two Completion Styles**: `get` returns a [`Deferred`], `get_with`
//!    takes a callback. Both funnel into [`Client::execute`] and
//!    [`Client::execute_with`].
//! 3. **Release Before Delivery**: The lease is dropped before the outcome is
//!    handed over, so an observer of the result can rely on reclaimed
//!    capacity.
//! 4. **One Error Channel**: Refused commands, acquire failures and store
//!    errors all arrive through the chosen completion, never as a panic or a
//!    synchronous return.

use redpool_proto::{ErrorReply, Value};
use tokio::runtime::Handle;
use tracing::debug;

use crate::cmd::{Cmd, ToArgs};
use crate::commands::{self, for_each_command};
use crate::completion::{Completion, Deferred};
use crate::config::PoolConfig;
use crate::error::{CommandError, ConnectionError, Result};
use crate::factory::RespFactory;
use crate::pool::{Pool, PoolOptions, PoolStatus};
use crate::transaction::Transaction;

/// Dual-mode command client backed by a bounded pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Pool<RespFactory>,
    runtime: Handle,
}

impl Client {
    /// Builds a client whose pool is named `id`.
    ///
    /// Must be called from inside a Tokio runtime; operations are spawned on
    /// it. Most callers go through [`PoolRegistry::client`](crate::PoolRegistry::client),
    /// which picks the id.
    pub fn with_id(id: impl Into<String>, config: PoolConfig) -> std::result::Result<Self, ConnectionError> {
        let runtime = Handle::try_current().map_err(|_| {
            ConnectionError::InvalidConfig("a pooled client must be built inside a Tokio runtime".into())
        })?;
        let config = config.normalized();
        config.validate()?;

        let options = PoolOptions::from(&config);
        let pool = Pool::new(id, RespFactory::new(config), options)?;
        Ok(Client { pool, runtime })
    }

    pub fn id(&self) -> &str {
        self.pool.id()
    }

    pub fn pool(&self) -> &Pool<RespFactory> {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Closes the pool. Pending and later operations fail with
    /// [`ConnectionError::PoolClosed`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs `cmd` and resolves the returned value with its reply.
    pub fn execute(&self, cmd: Cmd) -> Deferred<Value> {
        let (completion, deferred) = Completion::deferred();
        self.submit(cmd, completion);
        deferred
    }

    /// Runs `cmd` and invokes `callback` with its reply.
    pub fn execute_with<F>(&self, cmd: Cmd, callback: F)
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        self.submit(cmd, Completion::callback(callback));
    }

    /// Runs a command by name. Canonical and upper-case names are accepted.
    pub fn call<A: ToArgs>(&self, name: &str, args: A) -> Deferred<Value> {
        self.execute(Cmd::new(name).arg(args))
    }

    /// Callback form of [`Client::call`].
    pub fn call_with<A, F>(&self, name: &str, args: A, callback: F)
    where
        A: ToArgs,
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        self.execute_with(Cmd::new(name).arg(args), callback);
    }

    /// Starts a transaction. Nothing is sent until it is executed.
    pub fn multi(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Starts a transaction with `cmds` already queued.
    pub fn multi_from<I>(&self, cmds: I) -> Transaction
    where
        I: IntoIterator<Item = Cmd>,
    {
        cmds.into_iter().fold(self.multi(), Transaction::queue)
    }

    /// Alias of [`Client::multi`].
    pub fn begin_transaction(&self) -> Transaction {
        self.multi()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    fn submit(&self, cmd: Cmd, completion: Completion<Value>) {
        let pool = self.pool.clone();
        self.runtime.spawn(async move {
            let outcome = run_command(&pool, &cmd).await;
            completion.complete(outcome);
        });
    }
}

async fn run_command(pool: &Pool<RespFactory>, cmd: &Cmd) -> Result<Value> {
    commands::check(cmd.name())?;

    let reply = {
        let mut lease = pool.acquire().await?;
        match lease.execute(cmd).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.breaks_connection() {
                    lease.mark_broken();
                }
                debug!(pool = %pool.id(), command = cmd.name(), error = %err, "command failed");
                return Err(err.into());
            }
        }
    };

    Value::from_resp(reply).map_err(|ErrorReply(message)| {
        CommandError::Server {
            command: cmd.name().to_string(),
            message,
        }
        .into()
    })
}

macro_rules! client_methods {
    ($($method:ident / $with:ident => $wire:literal,)*) => {
        impl Client {
            $(
                #[doc = concat!("`", $wire, "`; the reply resolves the returned value.")]
                pub fn $method<A: ToArgs>(&self, args: A) -> Deferred<Value> {
                    self.execute(Cmd::new($wire).arg(args))
                }

                #[doc = concat!("`", $wire, "`; the reply is passed to `callback`.")]
                pub fn $with<A, F>(&self, args: A, callback: F)
                where
                    A: ToArgs,
                    F: FnOnce(Result<Value>) + Send + 'static,
                {
                    self.execute_with(Cmd::new($wire).arg(args), callback);
                }
            )*
        }
    };
}

for_each_command!(client_methods);
