use std::collections::HashMap;
use std::sync::Arc;

/// A hash read against one of the two key-value stores named in spec.md §6
/// (`CHASSIS_MIDPLANE_TABLE|DPU<n>` in "state", `DPU|dpu<n>` in "config").
/// Implementations never cache: the resolver re-reads on every call because
/// freshness matters more than the cost of a local unix-socket round trip.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the hash's fields, or an empty map if the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value store connection failed: {0}")]
    Connection(String),
    #[error("key-value store command failed: {0}")]
    Command(String),
}

/// A [`KvStore`] backed by a Redis-protocol unix-domain socket, matching
/// the SONiC-style `state_db`/`config_db` deployment described in spec.md
/// §6. Each call borrows a fresh connection from an internally managed
/// `ConnectionManager`, which redials transparently on disconnect.
pub struct RedisKvStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisKvStore {
    /// Connects to a Redis-compatible store over a unix-domain socket at
    /// `path`, selecting `db` (SONiC convention: each logical database is a
    /// numbered Redis DB on the same socket).
    pub async fn connect(path: &str, db: i64) -> Result<Self, KvError> {
        let addr = redis::ConnectionAddr::Unix(path.into());
        let info = redis::ConnectionInfo {
            addr,
            redis: redis::RedisConnectionInfo {
                db,
                ..Default::default()
            },
        };
        let client =
            redis::Client::open(info).map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait::async_trait]
impl KvStore for RedisKvStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))
    }
}

/// The two logical databases the resolver reads from.
#[derive(Clone)]
pub struct KvStores {
    pub state: Arc<dyn KvStore>,
    pub config: Arc<dyn KvStore>,
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// An in-memory [`KvStore`] double for resolver tests.
    #[derive(Default)]
    pub struct StaticKvStore {
        rows: Mutex<HashMap<String, HashMap<String, String>>>,
    }

    impl StaticKvStore {
        pub fn new(rows: impl IntoIterator<Item = (&'static str, HashMap<String, String>)>) -> Self {
            Self {
                rows: Mutex::new(rows.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl KvStore for StaticKvStore {
        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
            Ok(self.rows.lock().get(key).cloned().unwrap_or_default())
        }
    }
}
