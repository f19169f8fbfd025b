//! # Transactions
//!
//! Purpose: Queue commands on a chainable builder and run them as one
//! `MULTI ... EXEC` batch over a single pinned connection.
//!
//! ## Design Principles
//! 1. **No I/O While Queueing**: Builder methods only record commands.
//! 2. **One Lease**: `exec` acquires exactly one connection, sends the whole
//!    batch in a single write and releases the connection before completing.
//! 3. **All Or Nothing**: The outcome is every result in queue order, or one
//!    [`TransactionError`] for the whole batch.

use redpool_proto::{ErrorReply, RespValue, Value};
use tracing::debug;

use crate::client::Client;
use crate::cmd::{Cmd, ToArgs};
use crate::commands::{self, for_each_command};
use crate::completion::{Completion, Deferred};
use crate::error::{CommandError, Result, TransactionError};
use crate::factory::RespFactory;
use crate::pool::Pool;

/// Chainable queue of commands bound to a client.
#[derive(Debug)]
#[must_use = "a transaction does nothing until `exec` is called"]
pub struct Transaction {
    client: Client,
    queue: Vec<Cmd>,
    invalid: Option<CommandError>,
}

impl Transaction {
    pub(crate) fn new(client: Client) -> Self {
        Transaction {
            client,
            queue: Vec::new(),
            invalid: None,
        }
    }

    /// Appends a command. A command that cannot be dispatched makes `exec`
    /// fail with [`TransactionError::Invalid`].
    pub fn queue(mut self, cmd: Cmd) -> Self {
        if self.invalid.is_none() {
            if let Err(err) = commands::check(cmd.name()) {
                self.invalid = Some(err);
            }
        }
        self.queue.push(cmd);
        self
    }

    /// Appends a command by name.
    pub fn call<A: ToArgs>(self, name: &str, args: A) -> Self {
        self.queue(Cmd::new(name).arg(args))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn commands(&self) -> &[Cmd] {
        &self.queue
    }

    /// Drops the queue without contacting the store. Returns how many
    /// commands were discarded.
    pub fn discard(self) -> usize {
        self.queue.len()
    }

    /// Runs the batch; the returned value resolves with one result per
    /// queued command.
    pub fn exec(self) -> Deferred<Vec<Value>> {
        let (completion, deferred) = Completion::deferred();
        self.submit(completion);
        deferred
    }

    /// Runs the batch and passes the outcome to `callback`.
    pub fn exec_with<F>(self, callback: F)
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        self.submit(Completion::callback(callback));
    }

    fn submit(self, completion: Completion<Vec<Value>>) {
        let Transaction {
            client,
            queue,
            invalid,
        } = self;
        let pool = client.pool().clone();
        client.runtime().spawn(async move {
            let outcome = match invalid {
                Some(err) => Err(TransactionError::Invalid(err).into()),
                None => run_transaction(&pool, queue).await,
            };
            completion.complete(outcome);
        });
    }
}

async fn run_transaction(pool: &Pool<RespFactory>, queue: Vec<Cmd>) -> Result<Vec<Value>> {
    let queued = queue.len();
    let mut batch = Vec::with_capacity(queued + 2);
    batch.push(Cmd::new("MULTI"));
    batch.extend(queue);
    batch.push(Cmd::new("EXEC"));

    let mut lease = pool.acquire().await.map_err(TransactionError::Connection)?;
    let replies = match lease.execute_batch(&batch).await {
        Ok(replies) => replies,
        Err(err) => {
            lease.mark_broken();
            debug!(pool = %pool.id(), error = %err, "transaction lost its connection");
            return Err(TransactionError::Connection(err).into());
        }
    };
    // A refused MULTI leaves the session state unknown.
    if replies.first().map_or(true, |reply| reply.as_error().is_some()) {
        lease.mark_broken();
    }
    drop(lease);

    interpret(replies, queued).map_err(Into::into)
}

/// Maps the replies to `MULTI`, each queued command and `EXEC` onto the
/// transaction outcome.
fn interpret(replies: Vec<RespValue>, queued: usize) -> std::result::Result<Vec<Value>, TransactionError> {
    let mut replies = replies.into_iter();

    let multi = replies.next().ok_or_else(|| aborted("no reply to MULTI"))?;
    if let Some(message) = multi.as_error() {
        return Err(TransactionError::Aborted { message });
    }

    for index in 0..queued {
        let ack = replies
            .next()
            .ok_or_else(|| aborted("missing reply while queueing"))?;
        if let Some(message) = ack.as_error() {
            return Err(TransactionError::Rejected { index, message });
        }
    }

    let exec = replies.next().ok_or_else(|| aborted("no reply to EXEC"))?;
    match exec {
        RespValue::Array(Some(results)) if results.len() == queued => results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                Value::from_resp(result)
                    .map_err(|ErrorReply(message)| TransactionError::Command { index, message })
            })
            .collect(),
        RespValue::Array(Some(results)) => Err(aborted(format!(
            "EXEC returned {} results for {} commands",
            results.len(),
            queued
        ))),
        RespValue::Array(None) => Err(aborted("EXEC returned no results")),
        other => Err(TransactionError::Aborted {
            message: other
                .as_error()
                .unwrap_or_else(|| format!("unexpected EXEC reply: {other:?}")),
        }),
    }
}

fn aborted(message: impl Into<String>) -> TransactionError {
    TransactionError::Aborted {
        message: message.into(),
    }
}

macro_rules! transaction_methods {
    ($($method:ident / $with:ident => $wire:literal,)*) => {
        impl Transaction {
            $(
                #[doc = concat!("Queues `", $wire, "`.")]
                pub fn $method<A: ToArgs>(self, args: A) -> Self {
                    self.queue(Cmd::new($wire).arg(args))
                }
            )*
        }
    };
}

for_each_command!(transaction_methods);
