// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Startup rendezvous between the coordinator and its workers.
//!
//! The distributed runtime needs all ranks to enter its own (NCCL-level)
//! rendezvous within a bounded window. The original scripts approximated the
//! ordering with fixed sleeps; this gate makes it explicit: the coordinator
//! is ready the moment its listener accepts connections, and workers poll
//! that endpoint with bounded exponential backoff instead of sleeping blind.
//!
//! Workers only probe reachability. No payload crosses the socket, so a
//! worker restart never perturbs coordinator state.

use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// First retry delay for workers polling the coordinator
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Backoff doubles until it reaches this cap
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How long the pre-bind probe waits before concluding nobody is listening
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("rendezvous endpoint {0} is already in use by another listener")]
    AddrInUse(String),

    #[error("failed to bind rendezvous endpoint {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("timed out after {0:?} waiting for the coordinator")]
    Timeout(Duration),

    #[error("cancelled while waiting for the coordinator")]
    Cancelled,
}

/// The coordinator's half of the gate. Holds the accept loop that absorbs
/// worker probes; dropping it stops the loop.
#[derive(Debug)]
pub struct CoordinatorGate {
    port: u16,
    accept_loop: JoinHandle<()>,
}

impl CoordinatorGate {
    /// Port the gate actually listens on. Differs from the configured port
    /// only when the caller asked for port 0.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for CoordinatorGate {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Open the rendezvous listener on `host:port` and start absorbing worker
/// probes. Returns once the endpoint accepts connections, which is the
/// coordinator's readiness signal.
///
/// If something unrelated already listens there, fails fast instead of
/// letting workers rendezvous with a stranger.
pub async fn open_coordinator(
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<CoordinatorGate, GateError> {
    let addr = format!("{host}:{port}");

    // Occupied-port check. Only meaningful for a real port; port 0 is
    // always ours to claim.
    if port != 0
        && tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr))
            .await
            .is_ok_and(|conn| conn.is_ok())
    {
        return Err(GateError::AddrInUse(addr));
    }

    let listener = TcpListener::bind(&addr).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            GateError::AddrInUse(addr.clone())
        } else {
            GateError::Bind {
                addr: addr.clone(),
                source,
            }
        }
    })?;
    let local_port = listener
        .local_addr()
        .map_err(|source| GateError::Bind {
            addr: addr.clone(),
            source,
        })?
        .port();

    tracing::info!("rendezvous gate open on {host}:{local_port}");

    let accept_loop = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((_stream, peer)) => {
                            // Reachability probe only; the stream closes on drop.
                            tracing::debug!("rendezvous probe from {peer}");
                        }
                        Err(e) => {
                            tracing::warn!("rendezvous accept failed: {e}");
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("rendezvous gate shutting down");
                    break;
                }
            }
        }
    });

    Ok(CoordinatorGate {
        port: local_port,
        accept_loop,
    })
}

/// Worker side: poll `host:port` until the coordinator is reachable.
///
/// Retries with exponential backoff (500 ms doubling, capped at 10 s) until
/// the connect succeeds, the overall `timeout` elapses, or `cancel` fires.
/// The timeout never trips early; cancellation is honored within one retry
/// interval.
pub async fn await_coordinator(
    host: &str,
    port: u16,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), GateError> {
    let addr = format!("{host}:{port}");
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());

        // Bound each connect attempt so an unresponsive (dropping, not
        // refusing) endpoint cannot eat the whole window in one call.
        let attempt_budget = remaining.max(PROBE_TIMEOUT).min(MAX_BACKOFF);
        let connect = tokio::time::timeout(attempt_budget, TcpStream::connect(&addr));

        tokio::select! {
            result = connect => {
                match result {
                    Ok(Ok(_stream)) => {
                        tracing::info!("coordinator reachable at {addr} (attempt {attempt})");
                        return Ok(());
                    }
                    Ok(Err(e)) => {
                        tracing::debug!("coordinator not ready at {addr}: {e} (attempt {attempt})");
                    }
                    Err(_) => {
                        tracing::debug!("coordinator probe timed out at {addr} (attempt {attempt})");
                    }
                }
            }
            _ = cancel.cancelled() => {
                return Err(GateError::Cancelled);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(GateError::Timeout(timeout));
        }

        let wait = backoff.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {
                return Err(GateError::Cancelled);
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
