//! Redis-backed counter store.
//!
//! Counters live in a shared Redis instance so several processes can enforce
//! one budget. Every operation maps onto a single atomic Redis command:
//!
//! - `get` -> `GET`
//! - `set_initial` -> `SET key value EX ttl`
//! - `incr` -> `INCR`, run from a script so a missing key is reported
//!   instead of silently created without an expiry
//! - `expire` -> `EXPIRE`
//!
//! The store adds no locking of its own. Two callers racing through
//! `get` -> `incr` on the same key can let one extra event through at a
//! window boundary; this is a known property of the fixed-window scheme.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info, instrument, trace};

use super::connection::LazyConnection;
use crate::error::{Result, ThrottleError};
use crate::ratelimit::CounterStore;

/// Increment only when the key exists. `INCR` keeps the key's TTL.
///
/// Replies with a status tag first: `{0}` missing, `{1, count}` incremented,
/// `{2}` the stored value is not an integer.
const GUARDED_INCR_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {0}
end
local reply = redis.pcall('INCR', KEYS[1])
if type(reply) == 'table' and reply.err then
    return {2}
end
return {1, reply}
"#;

const INCR_MISSING: i64 = 0;
const INCR_OK: i64 = 1;
const INCR_NOT_INTEGER: i64 = 2;

/// Connection parameters for the shared counter service.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteParams {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Optional password
    pub credential: Option<String>,
    /// Logical database index
    pub db: u8,
}

impl RemoteParams {
    /// Parameters for `host:port` with no password on database 0.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credential: None,
            db: 0,
        }
    }

    /// Set the password.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Set the database index.
    pub fn with_db(mut self, db: u8) -> Self {
        self.db = db;
        self
    }

    /// Connection URL understood by the Redis client.
    pub fn url(&self) -> String {
        match &self.credential {
            Some(pw) if !pw.is_empty() => {
                format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self::new("localhost", 6379)
    }
}

impl fmt::Debug for RemoteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .finish()
    }
}

/// Counter store backed by a shared Redis instance.
///
/// The connection is opened lazily on first use and then shared by every
/// operation issued through this store. It is closed when the store is dropped.
pub struct RemoteStore {
    params: RemoteParams,
    client: Client,
    connection: LazyConnection<MultiplexedConnection>,
    key_prefix: String,
    incr_script: Script,
}

impl RemoteStore {
    /// Create a store for `host:port`. No connection is made until first use.
    pub fn new(host: impl Into<String>, port: u16, credential: Option<String>) -> Result<Self> {
        let mut params = RemoteParams::new(host, port);
        params.credential = credential;
        Self::with_params(params)
    }

    /// Create a store from full connection parameters.
    pub fn with_params(params: RemoteParams) -> Result<Self> {
        let client = Client::open(params.url())?;
        Ok(Self {
            params,
            client,
            connection: LazyConnection::new(),
            key_prefix: String::new(),
            incr_script: Script::new(GUARDED_INCR_SCRIPT),
        })
    }

    /// Prepend `prefix` to every key this store touches.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The connection parameters of this store.
    pub fn params(&self) -> &RemoteParams {
        &self.params
    }

    /// Whether the shared connection has been opened.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// How many times this store has tried to open its connection.
    pub fn connection_attempts(&self) -> usize {
        self.connection.attempts()
    }

    /// Get the shared connection, opening it on first call.
    ///
    /// Concurrent first calls open exactly one connection. Failures are
    /// returned as `Transport` errors and are not retried here.
    #[instrument(skip(self), fields(host = %self.params.host, port = self.params.port))]
    pub async fn connect(&self) -> Result<MultiplexedConnection> {
        self.connection
            .get_or_connect(|| async {
                debug!("Opening connection to counter service");
                let conn = self.client.get_multiplexed_async_connection().await?;
                info!(db = self.params.db, "Connected to counter service");
                Ok::<_, ThrottleError>(conn)
            })
            .await
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("params", &self.params)
            .field("key_prefix", &self.key_prefix)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Map the tagged reply of [`GUARDED_INCR_SCRIPT`] onto the store's errors.
fn decode_incr_reply(key: &str, reply: &[i64]) -> Result<i64> {
    match reply {
        [INCR_OK, count] => Ok(*count),
        [INCR_MISSING] => Err(ThrottleError::KeyNotFound(key.to_string())),
        [INCR_NOT_INTEGER] => Err(ThrottleError::NotAnInteger(key.to_string())),
        other => Err(ThrottleError::Transport(redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "unexpected increment reply",
            format!("{:?}", other),
        )))),
    }
}

/// Redis only accepts whole seconds for `EX`/`EXPIRE`; never send zero.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CounterStore for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connect().await?;
        let raw: Option<String> = conn.get(self.key(key)).await?;
        trace!(key = %key, value = ?raw, "GET");

        raw.map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| ThrottleError::NotAnInteger(key.to_string()))
        })
        .transpose()
    }

    async fn set_initial(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.connect().await?;
        let _: () = conn.set_ex(self.key(key), value, ttl_secs(ttl)).await?;
        trace!(key = %key, value = value, ttl_secs = ttl_secs(ttl), "SET EX");
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connect().await?;
        let reply: Vec<i64> = self
            .incr_script
            .key(self.key(key))
            .invoke_async(&mut conn)
            .await?;
        trace!(key = %key, reply = ?reply, "INCR");
        decode_incr_reply(key, &reply)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connect().await?;
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let updated: bool = conn.expire(self.key(key), secs).await?;
        trace!(key = %key, ttl_secs = secs, updated = updated, "EXPIRE");
        if updated {
            Ok(())
        } else {
            Err(ThrottleError::KeyNotFound(key.to_string()))
        }
    }
}
