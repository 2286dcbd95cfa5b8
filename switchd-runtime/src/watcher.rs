//! Cert-Rotation Watcher (spec.md §4.9). Watches the directories holding
//! the server cert/key and, if configured, the CA bundle, and swaps the
//! [`CertCache`] whenever a new file lands. Availability wins over
//! freshness throughout: a bad write keeps the previously cached material
//! and is only logged.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cert::{self, CertCache};
use crate::tls::TlsFrontEnd;
use std::sync::Arc;

/// Paths the watcher reloads on change.
pub struct WatchedPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: Option<PathBuf>,
}

/// A relevant filesystem event: one of our watched files was written,
/// moved into place, or created. Matches spec.md §4.9's "close-after-write,
/// moved-into-dir, or created" trigger set.
fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn touches(event: &Event, path: &Path) -> bool {
    event.paths.iter().any(|p| p == path)
}

/// Starts watching the cert/key (and, if present, CA) parent directories.
/// Returns the live `notify::Watcher` handle; dropping it stops watching,
/// so the caller must hold it for the process lifetime.
pub fn spawn(
    paths: WatchedPaths,
    cache: Arc<CertCache>,
    tls: Arc<TlsFrontEnd>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::channel::<Event>(64);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                let _ = tx.try_send(event);
            }
            Err(e) => warn!(error = %e, "cert watcher error"),
        }
    })?;

    for dir in watch_dirs(&paths) {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching for certificate changes");
    }

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !is_relevant(&event) {
                continue;
            }
            handle_event(&event, &paths, &cache, &tls);
        }
    });

    Ok(watcher)
}

fn watch_dirs(paths: &WatchedPaths) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(parent) = paths.cert.parent() {
        dirs.push(parent.to_path_buf());
    }
    if let Some(ca) = &paths.ca {
        if let Some(parent) = ca.parent() {
            if !dirs.contains(&parent.to_path_buf()) {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    dirs
}

fn handle_event(event: &Event, paths: &WatchedPaths, cache: &CertCache, tls: &TlsFrontEnd) {
    let cert_touched = touches(event, &paths.cert) || touches(event, &paths.key);
    let ca_touched = paths
        .ca
        .as_ref()
        .map(|ca| touches(event, ca))
        .unwrap_or(false);

    if matches!(event.kind, EventKind::Remove(_)) {
        // spec.md §4.9: on removed/renamed-away, keep the previously
        // cached cert rather than clearing it.
        if cert_touched {
            warn!("certificate file removed; keeping previously cached identity");
        }
        if ca_touched {
            warn!("CA file removed; keeping previously cached root pool");
        }
        return;
    }

    if cert_touched {
        match cert::load_and_validate(&paths.cert, &paths.key) {
            Ok(material) => {
                cache.swap_cert(material);
                info!("rotated server certificate");
            }
            Err(e) => {
                error!(error = %e, "failed to load rotated certificate; keeping previous");
            }
        }
    }

    if ca_touched {
        if let Some(ca_path) = &paths.ca {
            match cert::load_ca_pool(ca_path) {
                Ok(pool) => {
                    cache.swap_ca(pool);
                    tls.rebuild_on_ca_rotation();
                    info!("rotated CA pool");
                }
                Err(e) => {
                    error!(error = %e, "failed to load rotated CA pool; keeping previous");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_event_is_relevant_but_not_a_cert_event() {
        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File));
        assert!(is_relevant(&event));
    }

    #[test]
    fn unrelated_kind_is_not_relevant() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Open(
            notify::event::AccessMode::Any,
        )));
        assert!(!is_relevant(&event));
    }

    #[test]
    fn watch_dirs_dedupes_shared_parent() {
        let paths = WatchedPaths {
            cert: PathBuf::from("/etc/switchd/tls/server.crt"),
            key: PathBuf::from("/etc/switchd/tls/server.key"),
            ca: Some(PathBuf::from("/etc/switchd/tls/ca.crt")),
        };
        assert_eq!(watch_dirs(&paths), vec![PathBuf::from("/etc/switchd/tls")]);
    }
}
