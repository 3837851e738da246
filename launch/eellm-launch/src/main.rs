// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-node entrypoint.
//!
//! Resolves the launch topology, runs the launch pipeline under a
//! cancellation token wired to SIGINT/SIGTERM, prints the one structured
//! report line, and exits with the outcome's code.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use eellm_coordinator::config::WorkerConfig;
use eellm_coordinator::{
    launch, logging, worker, CancellationToken, LaunchConfig, LaunchOptions, LaunchOutcome,
    LaunchReport,
};

mod flags;
use flags::Flags;

fn main() -> ExitCode {
    logging::init();

    let flags = Flags::parse();
    let report = LaunchReport::new();

    let config = match LaunchConfig::resolve(&flags.to_env_map()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err}");
            let code = report.emit(LaunchOutcome::ConfigError(err.key().to_string()));
            return ExitCode::from(code as u8);
        }
    };
    let opts = LaunchOptions::from_env();
    let worker_config = WorkerConfig::from_settings();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(async {
        let cancel = CancellationToken::new();
        worker::install_signal_handler(cancel.clone());

        worker::run_until_shutdown(
            cancel.clone(),
            Duration::from_secs(worker_config.graceful_shutdown_timeout),
            launch(&config, &opts, cancel.clone()),
        )
        .await
    });

    let code = report.emit(outcome);
    ExitCode::from(code as u8)
}
