//! Lifecycle State Machine (spec.md §4.10). A single control channel
//! carrying `{Stop, Start, Restart}`, fed by OS signals and by internal
//! components that need to force a restart. Unlike the upstream control
//! plane this crate was built from — which drains in-flight streams on
//! `drain::Watch` before exiting — this core force-stops on signal
//! (spec.md §4.10: "correctness of in-flight calls is a client concern").

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// A request delivered on the control channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Stop,
    Start,
    Restart,
}

/// Process lifecycle state (spec.md §4.10: `serving -> stopping -> terminated`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Serving,
    Stopping,
    Terminated,
}

/// Fans SIGTERM, SIGINT, SIGQUIT, and SIGHUP into `ControlEvent::Stop` on
/// the given sender. Returns once any one signal fires.
async fn watch_os_signals(tx: mpsc::Sender<ControlEvent>) {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    let which = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
        _ = quit.recv() => "SIGQUIT",
        _ = hup.recv() => "SIGHUP",
    };
    info!(signal = which, "received shutdown signal");
    let _ = tx.send(ControlEvent::Stop).await;
}

/// Drives the `serving -> stopping -> terminated` state machine. Spawns
/// the OS signal fan-in, then waits for the first `Stop`/`Restart` on
/// `control_rx`, force-closing the RPC server's shutdown handle the
/// instant one arrives (no drain).
pub struct Lifecycle {
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: mpsc::Receiver<ControlEvent>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        tokio::spawn(watch_os_signals(control_tx.clone()));
        Self {
            control_tx,
            control_rx,
        }
    }

    /// A sender internal components (e.g. an admin endpoint) can use to
    /// request `Restart` without going through an OS signal.
    pub fn control_handle(&self) -> mpsc::Sender<ControlEvent> {
        self.control_tx.clone()
    }

    /// Blocks until `Stop` or `Restart` is observed, then signals the
    /// paired `oneshot` so `serve_with_shutdown` unblocks immediately.
    /// Returns the state transition that followed.
    pub async fn run_until_stop(mut self, shutdown: oneshot::Sender<()>) -> LifecycleState {
        let event = match self.control_rx.recv().await {
            Some(event) => event,
            None => ControlEvent::Stop,
        };
        info!(?event, "force-stopping RPC server");
        let _ = shutdown.send(());
        match event {
            ControlEvent::Restart => LifecycleState::Stopping,
            _ => LifecycleState::Terminated,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_event_unblocks_shutdown_and_terminates() {
        let lifecycle = Lifecycle::new();
        let control = lifecycle.control_handle();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        control.send(ControlEvent::Stop).await.unwrap();
        let state = lifecycle.run_until_stop(shutdown_tx).await;

        assert_eq!(state, LifecycleState::Terminated);
        assert!(shutdown_rx.await.is_ok());
    }

    #[tokio::test]
    async fn restart_event_reports_stopping() {
        let lifecycle = Lifecycle::new();
        let control = lifecycle.control_handle();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();

        control.send(ControlEvent::Restart).await.unwrap();
        let state = lifecycle.run_until_stop(shutdown_tx).await;

        assert_eq!(state, LifecycleState::Stopping);
    }
}
