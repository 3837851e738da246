// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is
//! `READABLE`; `JSONL` is enabled by setting the `EELLM_LOGGING_JSONL`
//! environment variable to a truthy value.
//!
//! Filters are configured with the `EELLM_LOG` environment variable, a
//! comma-separated list of `module=level` directives. The default level is
//! `info`.
//!
//! Everything goes to stderr; stdout is reserved for the launch report.

use std::sync::Once;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// ENV used to set the log level
const FILTER_ENV: &str = "EELLM_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// Initialize the logger
pub fn init() {
    INIT.call_once(|| {
        let filter_layer = EnvFilter::builder()
            .with_default_directive(DEFAULT_FILTER_LEVEL.parse().unwrap())
            .with_env_var(FILTER_ENV)
            .from_env_lossy();

        if crate::config::jsonl_logging_enabled() {
            let l = fmt::layer()
                .with_ansi(false) // ansi escapes never belong in JSONL
                .json()
                .with_writer(std::io::stderr)
                .with_filter(filter_layer);
            tracing_subscriber::registry().with(l).init();
        } else {
            let l = fmt::layer()
                .with_ansi(!crate::config::disable_ansi_logging())
                .event_format(fmt::format().compact())
                .with_writer(std::io::stderr)
                .with_filter(filter_layer);
            tracing_subscriber::registry().with(l).init();
        }
    });
}
