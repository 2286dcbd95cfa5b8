//! Command-line surface (spec.md §6) and process assembly: wires the cert
//! cache, TLS front end, cert-rotation watcher, and lifecycle state
//! machine into a running `tonic` server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{info, warn};

use switchd_core::MethodRegistry;
use switchd_grpc::kv::{KvStores, RedisKvStore};
use switchd_grpc::{
    AuthInterceptor, ConnectionCache, DpuProxyInterceptor, DpuResolver, InterceptorChain,
    SwitchControlService,
};

use crate::cert::{self, CertCache};
use crate::lifecycle::Lifecycle;
use crate::tls::{ClientAuthPolicy, TlsFrontEnd};
use crate::watcher::{self, WatchedPaths};

/// SONiC convention: STATE_DB is database index 6 on the shared redis
/// unix socket.
const STATE_DB_INDEX: i64 = 6;
/// SONiC convention: CONFIG_DB is database index 4.
const CONFIG_DB_INDEX: i64 = 4;

/// Comma-separated subset of `{none, cert, password, jwt}` (spec.md §6).
/// Only `cert` changes this core's behavior; `password` and `jwt` are
/// accepted (so scripts that pass them don't fail to start) but log a
/// warning since this core has no such verifier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientAuthModes(Vec<ClientAuthMode>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientAuthMode {
    None,
    Cert,
    Password,
    Jwt,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized --client_auth mode {0:?}")]
pub struct InvalidClientAuthMode(String);

impl FromStr for ClientAuthModes {
    type Err = InvalidClientAuthMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let modes = s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|mode| match mode {
                "none" => Ok(ClientAuthMode::None),
                "cert" => Ok(ClientAuthMode::Cert),
                "password" => Ok(ClientAuthMode::Password),
                "jwt" => Ok(ClientAuthMode::Jwt),
                other => Err(InvalidClientAuthMode(other.to_string())),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self(modes))
    }
}

impl ClientAuthModes {
    fn requires_client_cert(&self) -> bool {
        self.0.contains(&ClientAuthMode::Cert)
    }

    fn warn_on_unimplemented_modes(&self) {
        for mode in &self.0 {
            if matches!(mode, ClientAuthMode::Password | ClientAuthMode::Jwt) {
                warn!(?mode, "client-auth mode accepted but not enforced by this core");
            }
        }
    }
}

#[derive(Debug, Parser)]
#[clap(name = "switchd", about = "switch telemetry control-plane core")]
pub struct Args {
    #[clap(long, default_value = "info", env = "SWITCHD_LOG")]
    log_level: String,

    /// Port the gRPC front end listens on.
    #[clap(long)]
    port: u16,

    /// Disables TLS entirely; mutually exclusive with serving any real
    /// credentials. Intended for local development only.
    #[clap(long = "noTLS")]
    no_tls: bool,

    /// Alias accepted for operator muscle memory; behaves like `--noTLS`.
    #[clap(long)]
    insecure: bool,

    #[clap(long)]
    server_crt: Option<PathBuf>,

    #[clap(long)]
    server_key: Option<PathBuf>,

    #[clap(long)]
    ca_crt: Option<PathBuf>,

    #[clap(long, default_value = "cert")]
    client_auth: ClientAuthModes,

    /// Relaxes client-cert requirement regardless of `--client_auth`.
    #[clap(long)]
    allow_no_client_auth: bool,

    /// 0 means infinite. Accepted for parity with the command-line
    /// surface; idle-connection eviction is left to the transport.
    #[clap(long, default_value_t = 0)]
    idle_conn_duration: u64,

    /// Max concurrent clients. Accepted for parity with the command-line
    /// surface; not yet enforced by this core.
    #[clap(long)]
    threshold: Option<u32>,

    #[clap(long = "with-master-arbitration")]
    with_master_arbitration: bool,

    #[clap(long = "with-save-on-set")]
    with_save_on_set: bool,

    /// Unix-domain socket for the redis-compatible state/config stores
    /// (spec.md §6).
    #[clap(long, default_value = "/var/run/redis/redis.sock")]
    redis_socket: String,

    /// Address for the `/ready` admin endpoint.
    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,
}

impl Args {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn tls_enabled(&self) -> bool {
        !(self.no_tls || self.insecure)
    }

    fn client_auth_policy(&self) -> ClientAuthPolicy {
        if self.allow_no_client_auth || self.ca_crt.is_none() {
            ClientAuthPolicy::Requested
        } else if self.client_auth.requires_client_cert() {
            ClientAuthPolicy::Required
        } else {
            ClientAuthPolicy::Disabled
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("--port must be > 0");
        }
        if self.tls_enabled() && (self.server_crt.is_none() || self.server_key.is_none()) {
            bail!("--server_crt and --server_key are required unless --noTLS or --insecure is set");
        }
        Ok(())
    }

    /// Runs the process: builds the cert cache, TLS front end, watcher,
    /// and `tonic` server, then blocks until the lifecycle state machine
    /// observes a stop.
    pub async fn run(self) -> Result<()> {
        self.validate()?;
        self.client_auth.warn_on_unimplemented_modes();

        if self.with_master_arbitration {
            info!("master-arbitration feature flag set (accepted, not enforced by this core)");
        }
        if self.with_save_on_set {
            info!("save-on-set feature flag set (accepted, not enforced by this core)");
        }

        let state_store = RedisKvStore::connect(&self.redis_socket, STATE_DB_INDEX)
            .await
            .context("connecting to STATE_DB")?;
        let config_store = RedisKvStore::connect(&self.redis_socket, CONFIG_DB_INDEX)
            .await
            .context("connecting to CONFIG_DB")?;
        let stores = KvStores {
            state: Arc::new(state_store),
            config: Arc::new(config_store),
        };

        let conn_cache = Arc::new(ConnectionCache::new());
        let resolver = DpuResolver::new(stores);

        let local = Arc::new(switchd_grpc::local::test_support::StubLocalHandler::default());
        let service = SwitchControlService::new(resolver, conn_cache, local);

        let require_client_cert = self.client_auth_policy() == ClientAuthPolicy::Required;
        let interceptor = InterceptorChain::new(vec![
            Arc::new(AuthInterceptor {
                require_client_cert,
            }) as Arc<dyn switchd_grpc::Step>,
            Arc::new(DpuProxyInterceptor {
                registry: Arc::new(MethodRegistry::default()),
            }) as Arc<dyn switchd_grpc::Step>,
        ]);

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(switchd_proto::FILE_DESCRIPTOR_SET)
            .build()
            .context("building gRPC reflection service")?;

        let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, self.port).into();
        let server = Server::builder()
            .add_service(
                switchd_proto::switch_control_server::SwitchControlServer::with_interceptor(
                    service,
                    interceptor,
                ),
            )
            .add_service(reflection);

        let mut registry = prometheus_client::registry::Registry::default();
        let _grpc_metrics = switchd_grpc::metrics::GrpcServerMetricsFamily::register(&mut registry);
        let registry = Arc::new(parking_lot::Mutex::new(registry));

        let (ready_tx, ready_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(crate::admin::serve(self.admin_addr, ready_rx, registry));

        let lifecycle = Lifecycle::new();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        if self.tls_enabled() {
            let cache = Arc::new(CertCache::new(true));
            let cert_path = self.server_crt.clone().expect("validated above");
            let key_path = self.server_key.clone().expect("validated above");

            // The watcher is always active on this path, so an invalid or
            // missing initial cert is not fatal: serve with an empty cache
            // and let handshakes fail (`DynamicCertResolver` returns `None`)
            // until the watcher picks up a valid pair.
            match cert::load_and_validate(&cert_path, &key_path) {
                Ok(material) => cache.swap_cert(material),
                Err(e) => warn!(error = %e, "no valid initial server certificate; serving with an empty cert cache until one appears"),
            }

            if let Some(ca_path) = &self.ca_crt {
                match cert::load_ca_pool(ca_path) {
                    Ok(pool) => cache.swap_ca(pool),
                    Err(e) => warn!(error = %e, "no valid initial CA bundle; serving with an empty CA cache until one appears"),
                }
            }

            let tls = Arc::new(TlsFrontEnd::new(cache.clone(), self.client_auth_policy()));
            let _watcher_handle = watcher::spawn(
                WatchedPaths {
                    cert: cert_path,
                    key: key_path,
                    ca: self.ca_crt.clone(),
                },
                cache,
                tls.clone(),
            )
            .context("starting certificate watcher")?;

            let incoming = tls.incoming(addr).await.context("binding TLS listener")?;
            info!(%addr, "switchd listening (TLS)");
            let _ = ready_tx.send(true);

            tokio::pin! {
                let serving = server.serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                });
            }
            tokio::select! {
                res = &mut serving => res.context("gRPC server exited")?,
                _ = lifecycle.run_until_stop(shutdown_tx) => {}
            }
        } else {
            warn!("TLS disabled; serving plaintext (development only)");
            let _ = ready_tx.send(true);
            tokio::pin! {
                let serving = server.serve_with_shutdown(addr, async {
                    let _ = shutdown_rx.await;
                });
            }
            info!(%addr, "switchd listening (plaintext)");
            tokio::select! {
                res = &mut serving => res.context("gRPC server exited")?,
                _ = lifecycle.run_until_stop(shutdown_tx) => {}
            }
        }

        info!("switchd terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_auth_modes_parse_known_values() {
        let modes: ClientAuthModes = "cert,password".parse().unwrap();
        assert!(modes.requires_client_cert());
    }

    #[test]
    fn client_auth_modes_reject_unknown_values() {
        let result: std::result::Result<ClientAuthModes, _> = "cert,bogus".parse();
        assert!(result.is_err());
    }
}
