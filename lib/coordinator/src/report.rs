// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The terminal outcome of a launch attempt.
//!
//! Orchestration above us (one coordinator process per node) branches on the
//! exit code and, if it wants detail, parses the single JSON report line on
//! stdout. Human-readable logs go to stderr and are never the interface.

use std::fmt;

use once_cell::sync::OnceCell;
use serde::Serialize;

/// Exit code reserved for configuration failures
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Exit code reserved for rendezvous timeouts
pub const EXIT_RENDEZVOUS_TIMEOUT: i32 = 3;

/// Exit code reserved for runtime subprocess failures
pub const EXIT_SUBPROCESS_FAILURE: i32 = 4;

/// Exit code reserved for operator-initiated cancellation
pub const EXIT_CANCELLED: i32 = 5;

/// Produced exactly once per launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum LaunchOutcome {
    Success,
    /// The offending environment key
    ConfigError(String),
    RendezvousTimeout,
    /// The runtime's verbatim exit code
    SubprocessFailure(i32),
    Cancelled,
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchOutcome::Success)
    }

    /// Process exit code for this outcome. Total: every variant maps.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchOutcome::Success => 0,
            LaunchOutcome::ConfigError(_) => EXIT_CONFIG_ERROR,
            LaunchOutcome::RendezvousTimeout => EXIT_RENDEZVOUS_TIMEOUT,
            LaunchOutcome::SubprocessFailure(_) => EXIT_SUBPROCESS_FAILURE,
            LaunchOutcome::Cancelled => EXIT_CANCELLED,
        }
    }
}

impl fmt::Display for LaunchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchOutcome::Success => write!(f, "success"),
            LaunchOutcome::ConfigError(key) => write!(f, "config error on '{key}'"),
            LaunchOutcome::RendezvousTimeout => write!(f, "rendezvous timeout"),
            LaunchOutcome::SubprocessFailure(code) => {
                write!(f, "runtime subprocess failed with exit code {code}")
            }
            LaunchOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Serialize)]
struct ReportLine<'a> {
    #[serde(flatten)]
    outcome: &'a LaunchOutcome,
    exit_code: i32,
}

/// Collapses gate and launcher results into one emitted [`LaunchOutcome`].
/// The first emission wins; later ones are logged and dropped.
#[derive(Default)]
pub struct LaunchReport {
    outcome: OnceCell<LaunchOutcome>,
}

impl LaunchReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outcome` if none has been recorded yet, print the structured
    /// report line for the recorded outcome, and return its exit code.
    pub fn emit(&self, outcome: LaunchOutcome) -> i32 {
        let mut first_emission = false;
        let recorded = self.outcome.get_or_init(|| {
            first_emission = true;
            outcome
        });
        if first_emission {
            // The one machine-readable line this process prints on stdout.
            println!("{}", report_line(recorded));
        } else {
            tracing::warn!(
                "ignoring late outcome; launch already reported as {recorded}"
            );
        }
        recorded.exit_code()
    }

    /// The recorded outcome, if any.
    pub fn outcome(&self) -> Option<&LaunchOutcome> {
        self.outcome.get()
    }
}

fn report_line(outcome: &LaunchOutcome) -> String {
    let line = ReportLine {
        outcome,
        exit_code: outcome.exit_code(),
    };
    // LaunchOutcome serialization is infallible: strings and ints only.
    serde_json::to_string(&line).expect("report line serialization")
}
