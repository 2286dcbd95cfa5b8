//! TLS Front End (spec.md §4.8). A TCP listener whose handshake config is
//! read fresh from the [`crate::cert::CertCache`] on every new connection:
//! the cached leaf certificate is resolved dynamically (so cert rotation
//! never requires a config rebuild), while the client-cert verifier is
//! baked into a rebuilt `rustls::ServerConfig` whenever the CA pool
//! changes, since rustls does not expose that verifier as a live callback
//! the way it does `ResolvesServerCert`.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::cert::CertCache;
use switchd_grpc::PeerIdentity;

/// How a new connection's client certificate is treated (spec.md §4.8
/// "Client-auth policy").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    /// `require-and-verify`: the default.
    Required,
    /// `request-only`: accept connections without a client cert.
    Requested,
    /// No CA is configured; client certs are neither requested nor checked.
    Disabled,
}

/// Reads the cert cache at call time, per connection (spec.md §4.8
/// "`GetCertificate` ... closures that read the cert cache at call
/// time"). Fails the handshake (by returning `None`) when the cache is
/// empty or the cached leaf has expired.
struct DynamicCertResolver {
    cache: Arc<CertCache>,
}

impl ResolvesServerCert for DynamicCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let material = self.cache.current_cert()?;
        if !material.is_currently_valid() {
            warn!("cached certificate is no longer within its validity window");
            return None;
        }
        Some(material.certified_key)
    }
}

/// Backlog size for the handshake-completion channel fed into
/// `Server::serve_with_incoming`. Small: a backed-up queue here means the
/// RPC server isn't keeping up with accepts, which should be visible, not
/// absorbed silently.
const ACCEPT_QUEUE: usize = 16;

/// Builds a fresh `rustls::ServerConfig` from the cache's current cert and
/// CA pool. Called once at start-up and again whenever the CA pool is
/// rotated; cert-only rotation is handled by `DynamicCertResolver` without
/// calling this again.
fn build_server_config(cache: Arc<CertCache>, policy: ClientAuthPolicy) -> Arc<ServerConfig> {
    let verifier = match (policy, cache.current_ca()) {
        (ClientAuthPolicy::Disabled, _) | (_, None) => WebPkiClientVerifier::no_client_auth(),
        (ClientAuthPolicy::Required, Some(roots)) => WebPkiClientVerifier::builder(roots)
            .build()
            .expect("client cert verifier configuration is static and known-valid"),
        (ClientAuthPolicy::Requested, Some(roots)) => WebPkiClientVerifier::builder(roots)
            .allow_unauthenticated()
            .build()
            .expect("client cert verifier configuration is static and known-valid"),
    };

    let resolver = Arc::new(DynamicCertResolver { cache });
    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec()];
    Arc::new(config)
}

/// Holds the live `ServerConfig` used for new accepts, rebuilt on CA
/// rotation (see [`build_server_config`]).
pub struct TlsFrontEnd {
    config: RwLock<Arc<ServerConfig>>,
    cache: Arc<CertCache>,
    policy: ClientAuthPolicy,
}

impl TlsFrontEnd {
    pub fn new(cache: Arc<CertCache>, policy: ClientAuthPolicy) -> Self {
        let config = build_server_config(cache.clone(), policy);
        Self {
            config: RwLock::new(config),
            cache,
            policy,
        }
    }

    /// Rebuilds the server config from the cache's current CA pool. Called
    /// by the cert-rotation watcher after a successful CA swap.
    pub fn rebuild_on_ca_rotation(&self) {
        let config = build_server_config(self.cache.clone(), self.policy);
        *self.config.write() = config;
    }

    fn current_config(&self) -> Arc<ServerConfig> {
        self.config.read().clone()
    }

    /// Binds `addr` and returns a stream of handshaked connections suitable
    /// for `tonic::transport::Server::serve_with_incoming`. Each accepted
    /// TCP connection is handshaked on its own task so one slow or
    /// malicious peer cannot stall new accepts (spec.md §4.8, §5
    /// "listener ... assumed safe for concurrent use").
    pub async fn incoming(
        self: Arc<Self>,
        addr: SocketAddr,
    ) -> io::Result<impl futures::Stream<Item = io::Result<TlsIo>>> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "TLS front end listening");
        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE);

        tokio::spawn(async move {
            loop {
                let (tcp, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let front_end = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let acceptor = TlsAcceptor::from(front_end.current_config());
                    match acceptor.accept(tcp).await {
                        Ok(stream) => {
                            let peer = peer_identity(&stream);
                            debug!(%peer_addr, ?peer, "TLS handshake complete");
                            let _ = tx.send(Ok(TlsIo { inner: stream, peer })).await;
                        }
                        Err(e) => {
                            debug!(%peer_addr, error = %e, "TLS handshake failed");
                        }
                    }
                });
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

fn peer_identity(stream: &tokio_rustls::server::TlsStream<TcpStream>) -> PeerIdentity {
    let (_, session) = stream.get_ref();
    let subject = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|der| x509_parser::parse_x509_certificate(der.as_ref()).ok())
        .map(|(_, cert)| cert.subject().to_string());
    PeerIdentity { subject }
}

/// Wraps a handshake-complete TLS stream so it can carry the peer identity
/// as connection-level metadata tonic copies onto every request made on
/// it, mirroring `tonic::transport::server::TlsConnectInfo`.
pub struct TlsIo {
    inner: tokio_rustls::server::TlsStream<TcpStream>,
    peer: PeerIdentity,
}

impl tonic::transport::server::Connected for TlsIo {
    type ConnectInfo = PeerIdentity;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.peer.clone()
    }
}

impl AsyncRead for TlsIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertCache;

    #[test]
    fn no_ca_forces_disabled_verifier_regardless_of_policy() {
        let cache = Arc::new(CertCache::new(true));
        let config = build_server_config(cache, ClientAuthPolicy::Required);
        // With no CA configured the resulting config must still build: it
        // falls back to no client-cert checking rather than panicking.
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }
}
