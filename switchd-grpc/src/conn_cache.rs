use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use switchd_core::{DpuIndex, DpuPort};
use tonic::transport::{Channel, Endpoint};

/// How often the connection sends an HTTP/2 keepalive ping (spec.md §4.4).
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// How long to wait for a pong before considering the peer dead.
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a single port dial attempt gets before moving to the next one.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct CachedConn {
    channel: Channel,
    port: DpuPort,
}

#[derive(Debug, thiserror::Error)]
#[error("DPU{index} unreachable on all of {ports:?}: {cause}")]
pub struct DialError {
    pub index: DpuIndex,
    pub ports: Vec<DpuPort>,
    pub cause: String,
}

/// Per-DPU memoized client transport, keyed by [`DpuIndex`]. At most one
/// live entry per index at any instant (spec.md §3 "Cached connection",
/// §8 "at most one transport entry"); creation is serialized through
/// double-checked locking (spec.md §4.4).
#[derive(Default)]
pub struct ConnectionCache {
    entries: RwLock<HashMap<DpuIndex, CachedConn>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized transport for `index`, dialing it on first use.
    /// `ports` is tried in order; the first port that accepts a connection
    /// is remembered for subsequent calls (spec.md "Port fallback").
    #[tracing::instrument(skip(self, ports), fields(dpu = %index))]
    pub async fn get_or_dial(
        &self,
        index: DpuIndex,
        address: IpAddr,
        ports: &[DpuPort],
    ) -> Result<Channel, DialError> {
        if let Some(conn) = self.entries.read().get(&index) {
            tracing::trace!(port = conn.port, "connection cache hit");
            return Ok(conn.channel.clone());
        }

        // Another caller may have won the race between the read-lock check
        // above and a later write-lock check below; re-check there, after
        // dialing, rather than holding the write lock (or any lock) across
        // the `.await`. Holding a lock across an await makes the guard live
        // in the future's state, and a `parking_lot` guard is `!Send`; it
        // would also serialize every DPU's dial behind this one lock.
        let mut last_cause = String::from("no ports configured");
        for &port in ports {
            match dial(address, port).await {
                Ok(channel) => {
                    tracing::info!(port, "dialed DPU");
                    let mut entries = self.entries.write();
                    if let Some(conn) = entries.get(&index) {
                        return Ok(conn.channel.clone());
                    }
                    entries.insert(index, CachedConn { channel: channel.clone(), port });
                    return Ok(channel);
                }
                Err(e) => {
                    tracing::debug!(port, error = %e, "dial failed, trying next port");
                    last_cause = e;
                }
            }
        }

        Err(DialError {
            index,
            ports: ports.to_vec(),
            cause: last_cause,
        })
    }
}

async fn dial(address: IpAddr, port: DpuPort) -> Result<Channel, String> {
    let uri = format!("http://{address}:{port}");
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| e.to_string())?
        .connect_timeout(DIAL_TIMEOUT)
        .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
        .keep_alive_timeout(KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true);

    tokio::time::timeout(DIAL_TIMEOUT, endpoint.connect())
        .await
        .map_err(|_| "connect timed out".to_string())?
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_ports_failing_reports_last_cause() {
        let cache = ConnectionCache::new();
        // 127.0.0.1 with nothing listening on these ports will fail fast.
        let err = cache
            .get_or_dial(DpuIndex(0), "127.0.0.1".parse().unwrap(), &[1, 2])
            .await
            .unwrap_err();
        assert_eq!(err.index, DpuIndex(0));
        assert_eq!(err.ports, vec![1, 2]);
    }
}
