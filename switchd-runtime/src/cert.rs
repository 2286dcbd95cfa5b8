//! Cert Cache (spec.md §3 "Cert cache", §4.8). Holds the currently valid
//! server identity and the trust-root pool used for client-certificate
//! verification, guarded by a single read-write lock (spec.md §5
//! "Cert cache: single read-write mutex").

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("parsing certificate: {0}")]
    Parse(String),
    #[error("certificate not yet valid (not_before={not_before:?})")]
    NotYetValid { not_before: SystemTime },
    #[error("certificate expired (not_after={not_after:?})")]
    Expired { not_after: SystemTime },
    #[error("building signing key: {0}")]
    Signing(String),
}

/// A validated server identity: the signing key plus the parsed leaf's
/// validity window, so the resolver can refuse an identity that expired
/// after it was loaded but before the next rotation event.
#[derive(Clone)]
pub struct CertMaterial {
    pub certified_key: Arc<CertifiedKey>,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

impl CertMaterial {
    pub fn is_currently_valid(&self) -> bool {
        let now = SystemTime::now();
        now >= self.not_before && now <= self.not_after
    }
}

/// Loads and validates a cert/key pair (spec.md §4.9 `load_and_validate`).
/// Rejects not-yet-valid and expired material; never caches or retries.
pub fn load_and_validate(cert_path: &Path, key_path: &Path) -> Result<CertMaterial, CertError> {
    let cert_bytes = std::fs::read(cert_path).map_err(|e| CertError::Io {
        path: cert_path.display().to_string(),
        source: e,
    })?;
    let key_bytes = std::fs::read(key_path).map_err(|e| CertError::Io {
        path: key_path.display().to_string(),
        source: e,
    })?;

    let chain = parse_cert_chain(&cert_bytes, &cert_path.display().to_string())?;
    let key = parse_private_key(&key_bytes, &key_path.display().to_string())?;

    let (not_before, not_after) = leaf_validity(&chain[0])?;
    let now = SystemTime::now();
    if now < not_before {
        return Err(CertError::NotYetValid { not_before });
    }
    if now > not_after {
        return Err(CertError::Expired { not_after });
    }

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| CertError::Signing(e.to_string()))?;

    Ok(CertMaterial {
        certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
        not_before,
        not_after,
    })
}

/// Loads and re-validates the configured CA bundle (spec.md §4.9: "also
/// attempt to re-validate the configured CA file if present").
pub fn load_ca_pool(ca_path: &Path) -> Result<Arc<rustls::RootCertStore>, CertError> {
    let bytes = std::fs::read(ca_path).map_err(|e| CertError::Io {
        path: ca_path.display().to_string(),
        source: e,
    })?;
    let certs = parse_cert_chain(&bytes, &ca_path.display().to_string())?;
    let mut store = rustls::RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| CertError::Parse(e.to_string()))?;
    }
    Ok(Arc::new(store))
}

fn parse_cert_chain(bytes: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let certs: Result<Vec<_>, _> =
        rustls_pemfile::certs(&mut Cursor::new(bytes)).collect();
    let certs = certs.map_err(|e| CertError::Parse(e.to_string()))?;
    if certs.is_empty() {
        return Err(CertError::NoCertificate(origin.to_string()));
    }
    Ok(certs)
}

fn parse_private_key(bytes: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>, CertError> {
    rustls_pemfile::private_key(&mut Cursor::new(bytes))
        .map_err(|e| CertError::Parse(e.to_string()))?
        .ok_or_else(|| CertError::NoPrivateKey(origin.to_string()))
}

fn leaf_validity(der: &CertificateDer<'_>) -> Result<(SystemTime, SystemTime), CertError> {
    let (_, cert) =
        X509Certificate::from_der(der.as_ref()).map_err(|e| CertError::Parse(e.to_string()))?;
    let validity = cert.validity();
    let not_before = UNIX_EPOCH
        + Duration::from_secs(validity.not_before.timestamp().try_into().unwrap_or_default());
    let not_after = UNIX_EPOCH
        + Duration::from_secs(validity.not_after.timestamp().try_into().unwrap_or_default());
    Ok((not_before, not_after))
}

/// State held by [`CertCache`]. Both fields may legitimately be absent at
/// start-up when a watcher is active (spec.md §3 invariant).
struct State {
    cert: Option<CertMaterial>,
    ca: Option<Arc<rustls::RootCertStore>>,
    watcher_active: bool,
}

/// The process-wide cert cache (spec.md §3, §9 "shared mutable caches").
/// Readers never see a torn state: swaps replace the whole `Option<T>` in
/// one write-lock critical section.
pub struct CertCache {
    state: RwLock<State>,
}

impl CertCache {
    pub fn new(watcher_active: bool) -> Self {
        Self {
            state: RwLock::new(State {
                cert: None,
                ca: None,
                watcher_active,
            }),
        }
    }

    pub fn current_cert(&self) -> Option<CertMaterial> {
        self.state.read().cert.clone()
    }

    pub fn current_ca(&self) -> Option<Arc<rustls::RootCertStore>> {
        self.state.read().ca.clone()
    }

    pub fn is_cert_present(&self) -> bool {
        self.state.read().cert.is_some()
    }

    pub fn watcher_active(&self) -> bool {
        self.state.read().watcher_active
    }

    pub fn swap_cert(&self, material: CertMaterial) {
        self.state.write().cert = Some(material);
    }

    pub fn swap_ca(&self, pool: Arc<rustls::RootCertStore>) {
        self.state.write().ca = Some(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_empty_when_watcher_active() {
        let cache = CertCache::new(true);
        assert!(!cache.is_cert_present());
        assert!(cache.watcher_active());
    }

    #[test]
    fn missing_cert_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            load_and_validate(&dir.path().join("missing.crt"), &dir.path().join("missing.key"))
                .unwrap_err();
        assert!(matches!(err, CertError::Io { .. }));
    }

    #[test]
    fn non_pem_cert_file_has_no_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, b"not a certificate").unwrap();
        std::fs::write(&key_path, b"not a key").unwrap();
        let err = load_and_validate(&cert_path, &key_path).unwrap_err();
        assert!(matches!(err, CertError::NoCertificate(_)));
    }
}
