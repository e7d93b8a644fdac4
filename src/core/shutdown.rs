//! # OS termination signals → session cancellation.
//!
//! [`cancel_on_signal`] spawns a watcher that cancels the session token when the
//! process receives a termination signal. The session then takes its
//! cancellation path (release everything, optionally kill the host).
//!
//! ## Signals
//! **Unix platforms:** `SIGINT`, `SIGTERM`, `SIGQUIT`
//!
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`]

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};

/// Completes when a termination signal arrives, or with `Err` if listeners cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Completes when a termination signal arrives, or with `Err` if listeners cannot be installed.
#[cfg(not(unix))]
pub(crate) async fn wait_for_termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl_c")
}

/// Cancels `token` on the first termination signal.
///
/// The watcher exits quietly when `token` is cancelled for another reason.
pub(crate) fn cancel_on_signal(token: CancellationToken, bus: Bus) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            res = wait_for_termination_signal() => match res {
                Ok(signal) => {
                    tracing::info!(signal, "termination signal received; cancelling session");
                    bus.publish(Event::new(EventKind::ShutdownRequested).with_reason(signal));
                    token.cancel();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot install signal handlers; signals ignored");
                }
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_exits_when_token_is_cancelled() {
        let token = CancellationToken::new();
        let handle = cancel_on_signal(token.clone(), Bus::new(4));
        token.cancel();
        handle.await.unwrap();
    }
}
