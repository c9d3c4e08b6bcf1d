//! Stop signals and draining of in-flight report runs.

use std::fmt;
use std::time::Duration;

use martex_runtime::GracefulShutdown;

use crate::TRACING_TARGET_SHUTDOWN;

/// Process signal asking martex to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT, usually Ctrl+C.
    Interrupt,
    /// SIGTERM, sent by process supervisors.
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolves with the first stop signal received.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn stop_signal() -> StopSignal {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => StopSignal::Interrupt,
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "Failed to install SIGINT handler"
                );
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                StopSignal::Terminate
            }
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "Failed to install SIGTERM handler"
                );
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<StopSignal>();

    tokio::select! {
        signal = interrupt => signal,
        signal = terminate => signal,
    }
}

/// Waits for a stop signal, then drains `shutdown` within `timeout`.
///
/// Returns whether every active run finished in time.
pub async fn drain_on_signal(shutdown: GracefulShutdown, timeout: Duration) -> bool {
    let signal = stop_signal().await;
    drain(&shutdown, signal, timeout).await
}

/// Refuses new runs, cancels the active ones and waits for them to settle.
async fn drain(shutdown: &GracefulShutdown, signal: StopSignal, timeout: Duration) -> bool {
    tracing::info!(
        target: TRACING_TARGET_SHUTDOWN,
        %signal,
        active = shutdown.active_count(),
        timeout_secs = timeout.as_secs(),
        "Stop signal received, draining report runs"
    );

    shutdown.initiate();
    let drained = shutdown.wait_for_idle(timeout).await;

    if drained {
        tracing::info!(target: TRACING_TARGET_SHUTDOWN, %signal, "Report runs drained");
    } else {
        tracing::warn!(
            target: TRACING_TARGET_SHUTDOWN,
            %signal,
            remaining = ?shutdown.active_processes(),
            "Report runs still active after the shutdown timeout"
        );
    }
    drained
}
