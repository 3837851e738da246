// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shutdown signal handling.
//!
//! Traps `SIGINT` and `SIGTERM` and cancels the root [`CancellationToken`],
//! which interrupts whichever suspension point the launch is at (the
//! rendezvous wait or the child-process wait). After cancellation, teardown
//! is bounded by the graceful-shutdown timeout from
//! [`crate::config::WorkerConfig`]; a launch that cannot tear down in time
//! is reported as cancelled anyway rather than hanging the node.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::report::LaunchOutcome;

/// Spawn the signal handler for `cancel`.
pub fn install_signal_handler(cancel: CancellationToken) {
    tokio::spawn(signal_handler(cancel));
}

/// Catch signals and trigger a shutdown
async fn signal_handler(cancel_token: CancellationToken) -> anyhow::Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await?;
        anyhow::Ok(())
    };

    let sigterm = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        anyhow::Ok(())
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = sigterm => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        },
        _ = cancel_token.cancelled() => {
            tracing::info!("CancellationToken triggered; shutting down");
        },
    }

    cancel_token.cancel();

    Ok(())
}

/// Drive `launch` to completion, but once `cancel` fires give teardown at
/// most `graceful_timeout` before declaring the launch cancelled.
///
/// The launch future owns the child handle with kill-on-drop set, so
/// abandoning it here cannot orphan the runtime.
pub async fn run_until_shutdown<F>(
    cancel: CancellationToken,
    graceful_timeout: Duration,
    launch: F,
) -> LaunchOutcome
where
    F: Future<Output = LaunchOutcome>,
{
    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(graceful_timeout).await;
    };

    tokio::select! {
        outcome = launch => outcome,
        _ = deadline => {
            tracing::error!(
                "teardown did not finish within {graceful_timeout:?} of shutdown"
            );
            LaunchOutcome::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_normally_without_cancel() {
        let cancel = CancellationToken::new();
        let outcome = run_until_shutdown(cancel, Duration::from_secs(5), async {
            LaunchOutcome::Success
        })
        .await;
        assert_eq!(outcome, LaunchOutcome::Success);
    }

    #[tokio::test]
    async fn hung_teardown_is_bounded() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run_until_shutdown(cancel, Duration::from_millis(100), async {
            // A launch that never notices the cancellation.
            tokio::time::sleep(Duration::from_secs(60)).await;
            LaunchOutcome::Success
        })
        .await;
        assert_eq!(outcome, LaunchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn prompt_teardown_keeps_its_outcome() {
        let cancel = CancellationToken::new();
        let launch_cancel = cancel.clone();
        cancel.cancel();

        let outcome = run_until_shutdown(cancel, Duration::from_secs(5), async move {
            launch_cancel.cancelled().await;
            LaunchOutcome::Cancelled
        })
        .await;
        assert_eq!(outcome, LaunchOutcome::Cancelled);
    }
}
