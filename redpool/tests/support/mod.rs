//! In-process RESP server for integration tests.
//!
//! Implements just enough of the store to exercise the pool: strings,
//! database selection, authentication, MULTI/EXEC and QUIT. Every connection
//! keeps a log of the commands it received so tests can assert which
//! connection ran what.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use redpool::{Address, PoolConfig};
use redpool_proto::{decode, RespValue};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once. `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Behavior switches for the test server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Require `AUTH` with this password before any other command.
    pub password: Option<String>,
    /// Number of selectable databases.
    pub databases: u32,
    /// Artificial latency for data commands.
    pub delay: Option<Duration>,
    /// Drop the connection without replying when a command names this key.
    pub close_on_key: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            password: None,
            databases: 16,
            delay: None,
            close_on_key: None,
        }
    }
}

/// Counters and logs shared by every connection of one server.
#[derive(Debug, Default)]
pub struct Stats {
    accepted: AtomicUsize,
    open: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    logs: Mutex<Vec<Vec<String>>>,
    client_names: Mutex<Vec<String>>,
}

impl Stats {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of data commands that were being served at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Command names received, one list per accepted connection.
    pub fn logs(&self) -> Vec<Vec<String>> {
        lock(&self.logs).clone()
    }

    pub fn client_names(&self) -> Vec<String> {
        lock(&self.client_names).clone()
    }

    fn register(&self) -> usize {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        let mut logs = lock(&self.logs);
        logs.push(Vec::new());
        logs.len() - 1
    }

    fn record(&self, conn: usize, name: &str) {
        if let Some(log) = lock(&self.logs).get_mut(conn) {
            log.push(name.to_string());
        }
    }

    fn begin(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ServerState {
    options: ServerOptions,
    store: Mutex<HashMap<(u32, Vec<u8>), Vec<u8>>>,
    stats: Arc<Stats>,
}

/// A running test server. Stops accepting when dropped.
pub struct TestServer {
    address: Address,
    state: Arc<ServerState>,
    accept: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> TestServer {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(options: ServerOptions) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = ServerState::new(options);

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = stream.set_nodelay(true);
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        TestServer {
            address: Address::Tcp {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            state,
            accept,
        }
    }

    #[cfg(unix)]
    pub async fn start_unix(options: ServerOptions) -> TestServer {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "redpool-test-{}-{}.sock",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).expect("bind unix socket");
        let state = ServerState::new(options);

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        TestServer {
            address: Address::Unix(path),
            state,
            accept,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Pool config pointing at this server, with eviction off.
    pub fn config(&self) -> PoolConfig {
        let config = PoolConfig::new().evict_idle(false);
        match &self.address {
            Address::Tcp { host, port } => config.host(host.clone()).port(*port),
            Address::Unix(path) => config.unix_socket(path.clone()),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.state.stats
    }

    /// Reads a key straight from the store, bypassing any connection.
    pub fn peek(&self, database: u32, key: &str) -> Option<String> {
        lock(&self.state.store)
            .get(&(database, key.as_bytes().to_vec()))
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept.abort();
        if let Address::Unix(path) = &self.address {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[derive(Default)]
struct Session {
    database: u32,
    authenticated: bool,
    queued: Option<Vec<Vec<Vec<u8>>>>,
    poisoned: bool,
}

enum Outcome {
    Reply(RespValue),
    Close(Option<RespValue>),
}

async fn serve<S>(stream: S, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let conn = state.stats.register();
    let _ = handle_connection(stream, &state, conn).await;
    state.stats.open.fetch_sub(1, Ordering::SeqCst);
}

async fn handle_connection<S>(mut stream: S, state: &ServerState, conn: usize) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut session = Session::default();
    let mut out = Vec::with_capacity(256);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        loop {
            let frame = match decode(&mut buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => {
                    stream.write_all(b"-ERR protocol error\r\n").await?;
                    return Ok(());
                }
            };
            let Some(args) = command_args(frame) else {
                stream.write_all(b"-ERR expected an array of bulk strings\r\n").await?;
                continue;
            };

            let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
            state.stats.record(conn, &name);

            out.clear();
            match state.dispatch(&mut session, &name, args).await {
                Outcome::Reply(reply) => {
                    reply.encode(&mut out);
                    stream.write_all(&out).await?;
                }
                Outcome::Close(reply) => {
                    if let Some(reply) = reply {
                        reply.encode(&mut out);
                        stream.write_all(&out).await?;
                    }
                    let _ = stream.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

impl ServerState {
    fn new(options: ServerOptions) -> Arc<Self> {
        Arc::new(ServerState {
            options,
            store: Mutex::new(HashMap::new()),
            stats: Arc::new(Stats::default()),
        })
    }

    async fn dispatch(&self, session: &mut Session, name: &str, args: Vec<Vec<u8>>) -> Outcome {
        match name {
            "QUIT" => return Outcome::Close(Some(ok())),
            "AUTH" => return Outcome::Reply(self.auth(session, &args)),
            _ => {}
        }
        if self.options.password.is_some() && !session.authenticated {
            return Outcome::Reply(error("NOAUTH Authentication required."));
        }
        if let Some(key) = &self.options.close_on_key {
            if args.get(1).map(Vec::as_slice) == Some(key.as_bytes()) {
                return Outcome::Close(None);
            }
        }

        let reply = match name {
            "MULTI" if session.queued.is_some() => error("ERR MULTI calls can not be nested"),
            "MULTI" => {
                session.queued = Some(Vec::new());
                session.poisoned = false;
                ok()
            }
            "DISCARD" => match session.queued.take() {
                Some(_) => ok(),
                None => error("ERR DISCARD without MULTI"),
            },
            "EXEC" => match session.queued.take() {
                None => error("ERR EXEC without MULTI"),
                Some(_) if session.poisoned => {
                    error("EXECABORT Transaction discarded because of previous errors.")
                }
                Some(queue) => {
                    let mut results = Vec::with_capacity(queue.len());
                    for args in queue {
                        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                        results.push(self.run(session, &name, &args).await);
                    }
                    RespValue::Array(Some(results))
                }
            },
            _ if session.queued.is_some() => match check_arity(name, args.len()) {
                Err(reply) => {
                    session.poisoned = true;
                    reply
                }
                Ok(()) => {
                    if let Some(queue) = session.queued.as_mut() {
                        queue.push(args);
                    }
                    simple("QUEUED")
                }
            },
            _ => self.run(session, name, &args).await,
        };
        Outcome::Reply(reply)
    }

    fn auth(&self, session: &mut Session, args: &[Vec<u8>]) -> RespValue {
        let Some(expected) = &self.options.password else {
            return error("ERR AUTH called without any password configured");
        };
        let (user, password) = match args.len() {
            2 => (b"default".as_slice(), &args[1]),
            3 => (args[1].as_slice(), &args[2]),
            _ => return arity_error("AUTH"),
        };
        if user == b"default" && password.as_slice() == expected.as_bytes() {
            session.authenticated = true;
            ok()
        } else {
            error("WRONGPASS invalid username-password pair or user is disabled.")
        }
    }

    async fn run(&self, session: &mut Session, name: &str, args: &[Vec<u8>]) -> RespValue {
        if let Err(reply) = check_arity(name, args.len()) {
            return reply;
        }

        let data_command = !matches!(name, "SELECT" | "CLIENT" | "PING");
        if data_command {
            self.stats.begin();
            if let Some(delay) = self.options.delay {
                tokio::time::sleep(delay).await;
            }
        }
        let reply = self.apply(session, name, args);
        if data_command {
            self.stats.end();
        }
        reply
    }

    fn apply(&self, session: &mut Session, name: &str, args: &[Vec<u8>]) -> RespValue {
        let db = session.database;
        match name {
            "PING" => match args.get(1) {
                Some(payload) => bulk(payload.clone()),
                None => simple("PONG"),
            },
            "ECHO" => bulk(args[1].clone()),
            "SELECT" => match parse_int(&args[1]) {
                Some(index) if index >= 0 && (index as u64) < u64::from(self.options.databases) => {
                    session.database = index as u32;
                    ok()
                }
                _ => error("ERR DB index is out of range"),
            },
            "CLIENT" if args[1].eq_ignore_ascii_case(b"SETNAME") && args.len() == 3 => {
                lock(&self.stats.client_names).push(String::from_utf8_lossy(&args[2]).into_owned());
                ok()
            }
            "CLIENT" => error("ERR unknown subcommand"),
            "GET" => match lock(&self.store).get(&(db, args[1].clone())) {
                Some(value) => bulk(value.clone()),
                None => RespValue::Bulk(None),
            },
            "SET" => {
                lock(&self.store).insert((db, args[1].clone()), args[2].clone());
                ok()
            }
            "GETDEL" => match lock(&self.store).remove(&(db, args[1].clone())) {
                Some(value) => bulk(value),
                None => RespValue::Bulk(None),
            },
            "DEL" => {
                let mut store = lock(&self.store);
                let removed = args[1..]
                    .iter()
                    .filter(|key| store.remove(&(db, (*key).clone())).is_some())
                    .count();
                RespValue::Integer(removed as i64)
            }
            "EXISTS" => {
                let store = lock(&self.store);
                let found = args[1..]
                    .iter()
                    .filter(|key| store.contains_key(&(db, (*key).clone())))
                    .count();
                RespValue::Integer(found as i64)
            }
            "INCR" => {
                let mut store = lock(&self.store);
                let key = (db, args[1].clone());
                let current = match store.get(&key) {
                    Some(value) => match parse_int(value) {
                        Some(number) => number,
                        None => return error("ERR value is not an integer or out of range"),
                    },
                    None => 0,
                };
                let next = current + 1;
                store.insert(key, next.to_string().into_bytes());
                RespValue::Integer(next)
            }
            "DBSIZE" => {
                let count = lock(&self.store).keys().filter(|(index, _)| *index == db).count();
                RespValue::Integer(count as i64)
            }
            "FLUSHDB" => {
                lock(&self.store).retain(|(index, _), _| *index != db);
                ok()
            }
            "INFO" => bulk(b"# Server\r\nredis_version:7.0.0\r\nrole:master\r\n".to_vec()),
            _ => error(&format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
        }
    }
}

fn check_arity(name: &str, len: usize) -> Result<(), RespValue> {
    let valid = match name {
        "PING" => len <= 2,
        "ECHO" | "GET" | "GETDEL" | "INCR" | "SELECT" => len == 2,
        "SET" => len >= 3,
        "DEL" | "EXISTS" | "CLIENT" => len >= 2,
        "DBSIZE" | "FLUSHDB" => len == 1,
        "INFO" => len <= 2,
        _ => {
            return Err(error(&format!(
                "ERR unknown command '{}'",
                name.to_ascii_lowercase()
            )))
        }
    };
    if valid {
        Ok(())
    } else {
        Err(arity_error(name))
    }
}

fn command_args(frame: RespValue) -> Option<Vec<Vec<u8>>> {
    let RespValue::Array(Some(items)) = frame else {
        return None;
    };
    let args: Option<Vec<Vec<u8>>> = items
        .into_iter()
        .map(|item| match item {
            RespValue::Bulk(Some(data)) => Some(data),
            _ => None,
        })
        .collect();
    args.filter(|args| !args.is_empty())
}

fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn ok() -> RespValue {
    simple("OK")
}

fn simple(message: &str) -> RespValue {
    RespValue::Simple(message.as_bytes().to_vec())
}

fn error(message: &str) -> RespValue {
    RespValue::Error(message.as_bytes().to_vec())
}

fn arity_error(name: &str) -> RespValue {
    error(&format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn bulk(data: Vec<u8>) -> RespValue {
    RespValue::Bulk(Some(data))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
