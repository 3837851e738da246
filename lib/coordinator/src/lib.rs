// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Multi-node launch coordinator for the EE-LLM model runtime.
//!
//! One coordinator process runs per node. Each resolves the same launch
//! topology from its environment, derives its role from its rank, passes
//! the rendezvous gate (rank 0 opens it, everyone else waits on it), then
//! starts and supervises the model-runtime subprocess. The node's one
//! externally observable result is a [`LaunchOutcome`].

pub use anyhow::{anyhow as error, Context as ErrorContext, Error, Result};

pub mod config;
pub mod logging;
pub mod rendezvous;
pub mod report;
pub mod subprocess;
pub mod worker;

pub use config::{ConfigError, LaunchConfig, LaunchOptions, Role};
pub use report::{LaunchOutcome, LaunchReport};
pub use tokio_util::sync::CancellationToken;

use config::keys;
use rendezvous::GateError;

/// Run one node's launch sequence to its terminal outcome.
///
/// Strictly sequential: role, rendezvous, subprocess. The only concurrency
/// underneath is the coordinator's accept loop and the child process, which
/// never share state with each other.
pub async fn launch(
    config: &LaunchConfig,
    opts: &LaunchOptions,
    cancel: CancellationToken,
) -> LaunchOutcome {
    if cancel.is_cancelled() {
        return LaunchOutcome::Cancelled;
    }

    let role = Role::from_rank(config.node_rank);
    tracing::info!(
        %role,
        node_rank = config.node_rank,
        num_nodes = config.num_nodes,
        tensor_parallel = config.tensor_parallel,
        pipeline_parallel = config.pipeline_parallel,
        "launch topology resolved"
    );

    // The gate guard must outlive the runtime: late workers keep probing
    // the endpoint while the runtime is already starting up.
    let _gate = match role {
        Role::Coordinator => {
            match rendezvous::open_coordinator(
                &config.master_addr,
                config.master_port,
                cancel.child_token(),
            )
            .await
            {
                Ok(gate) => Some(gate),
                Err(err) => {
                    tracing::error!("cannot open rendezvous endpoint: {err}");
                    return LaunchOutcome::ConfigError(keys::MASTER_PORT.to_string());
                }
            }
        }
        Role::Worker => {
            match rendezvous::await_coordinator(
                &config.master_addr,
                config.master_port,
                opts.rendezvous_timeout,
                &cancel,
            )
            .await
            {
                Ok(()) => None,
                Err(GateError::Cancelled) => return LaunchOutcome::Cancelled,
                Err(err) => {
                    tracing::error!("{err}");
                    return LaunchOutcome::RendezvousTimeout;
                }
            }
        }
    };

    let outcome = subprocess::run_runtime(config, &cancel, opts.kill_grace).await;

    // Operator shutdown wins over whatever the subprocess was doing.
    if cancel.is_cancelled() {
        return LaunchOutcome::Cancelled;
    }
    outcome
}
