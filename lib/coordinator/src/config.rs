// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Launch configuration.
//!
//! The original deployment scripts read environment variables ad-hoc, each
//! script failing (or worse, not failing) at the point of first use. Here the
//! whole launch topology is resolved into a single immutable [`LaunchConfig`]
//! before anything else runs, and the first missing or invalid key is
//! reported by name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Environment keys recognized by the resolver.
pub mod keys {
    pub const TOKENIZER_PATH: &str = "TOKENIZER_PATH";
    pub const CHECKPOINT_PATH: &str = "CHECKPOINT_PATH";
    pub const MASTER_ADDR: &str = "MASTER_ADDR";
    pub const MASTER_PORT: &str = "MASTER_PORT";
    pub const NODE_RANK: &str = "NODE_RANK";
    pub const NUM_NODES: &str = "NUM_NODES";
    pub const TENSOR_PARALLEL: &str = "TP";
    pub const PIPELINE_PARALLEL: &str = "PP";
    pub const SERVICE_PORT: &str = "PORT";
    pub const RUNTIME_CMD: &str = "EELLM_RUNTIME";
    pub const RENDEZVOUS_TIMEOUT: &str = "EELLM_RENDEZVOUS_TIMEOUT";
    pub const KILL_GRACE: &str = "EELLM_KILL_GRACE";
}

/// Default tensor-parallel degree
const DEFAULT_TP: u32 = 1;

/// Default pipeline-parallel degree
const DEFAULT_PP: u32 = 2;

/// Default inference-service port exposed by the runtime
const DEFAULT_SERVICE_PORT: u16 = 5000;

/// Executable launched when `EELLM_RUNTIME` is not set
const DEFAULT_RUNTIME_CMD: &str = "ee_llm_server";

/// A required or out-of-bounds launch input, identified by its key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required key '{0}'")]
    Missing(&'static str),

    #[error("invalid value for key '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    /// The environment key this error is about.
    pub fn key(&self) -> &'static str {
        match self {
            ConfigError::Missing(key) => key,
            ConfigError::Invalid { key, .. } => key,
        }
    }
}

/// Everything a node needs to know to participate in a multi-node launch.
///
/// Constructed once at process start and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LaunchConfig {
    /// Tokenizer asset, passed through unchanged to the runtime
    pub tokenizer_path: PathBuf,

    /// Model checkpoint directory, passed through unchanged
    pub checkpoint_path: PathBuf,

    /// Rendezvous host (the coordinator's address)
    pub master_addr: String,

    /// Rendezvous port
    #[validate(range(min = 1))]
    pub master_port: u16,

    /// This node's ordinal in [0, num_nodes)
    pub node_rank: u32,

    /// How many nodes participate in the job
    #[validate(range(min = 1))]
    pub num_nodes: u32,

    /// Tensor-parallel degree (width axis)
    #[validate(range(min = 1))]
    pub tensor_parallel: u32,

    /// Pipeline-parallel degree (depth axis)
    #[validate(range(min = 1))]
    pub pipeline_parallel: u32,

    /// Inference-service port exposed by the runtime
    #[validate(range(min = 1))]
    pub service_port: u16,

    /// The model-runtime executable to launch
    pub runtime_cmd: PathBuf,
}

/// Validated fields in resolution order, mapped back to their env keys so
/// bound violations are reported against the key the operator actually set.
const VALIDATED_KEYS: &[(&str, &str)] = &[
    ("master_port", keys::MASTER_PORT),
    ("num_nodes", keys::NUM_NODES),
    ("tensor_parallel", keys::TENSOR_PARALLEL),
    ("pipeline_parallel", keys::PIPELINE_PARALLEL),
    ("service_port", keys::SERVICE_PORT),
];

impl LaunchConfig {
    /// Resolve from a snapshot of the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::resolve(&vars)
    }

    /// Resolve and validate a [`LaunchConfig`] from an explicit key/value
    /// mapping. Fails with the first missing or invalid key, in the order
    /// the keys are documented. No side effects, so resolving the same
    /// mapping twice yields identical configs.
    pub fn resolve(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let config = LaunchConfig {
            tokenizer_path: required_path(vars, keys::TOKENIZER_PATH)?,
            checkpoint_path: required_path(vars, keys::CHECKPOINT_PATH)?,
            master_addr: required_string(vars, keys::MASTER_ADDR)?,
            master_port: required_parse(vars, keys::MASTER_PORT)?,
            node_rank: required_parse(vars, keys::NODE_RANK)?,
            num_nodes: optional_parse(vars, keys::NUM_NODES, 1)?,
            tensor_parallel: optional_parse(vars, keys::TENSOR_PARALLEL, DEFAULT_TP)?,
            pipeline_parallel: optional_parse(vars, keys::PIPELINE_PARALLEL, DEFAULT_PP)?,
            service_port: optional_parse(vars, keys::SERVICE_PORT, DEFAULT_SERVICE_PORT)?,
            runtime_cmd: vars
                .get(keys::RUNTIME_CMD)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_CMD)),
        };
        config.check_bounds()?;
        Ok(config)
    }

    /// Numeric bounds and the rank/topology cross-check.
    fn check_bounds(&self) -> Result<(), ConfigError> {
        if let Err(errors) = self.validate() {
            let fields = errors.field_errors();
            for (field, key) in VALIDATED_KEYS.iter().copied() {
                if let Some(field_errors) = fields.get(field) {
                    let reason = field_errors
                        .first()
                        .map(|e| e.code.to_string())
                        .unwrap_or_else(|| "out of range".to_string());
                    return Err(ConfigError::Invalid { key, reason });
                }
            }
        }
        if self.node_rank >= self.num_nodes {
            return Err(ConfigError::Invalid {
                key: keys::NODE_RANK,
                reason: format!(
                    "rank {} is outside [0, {})",
                    self.node_rank, self.num_nodes
                ),
            });
        }
        Ok(())
    }
}

/// Whether this process runs as the rendezvous coordinator or a plain worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl Role {
    /// Rank 0 coordinates, everyone else follows. Pure, no failure modes.
    pub fn from_rank(rank: u32) -> Role {
        if rank == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Tunables that bound the launch but are not part of the job topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Overall deadline for a worker waiting on the coordinator
    pub rendezvous_timeout: Duration,

    /// How long the runtime gets between SIGTERM and SIGKILL
    pub kill_grace: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        LaunchOptions {
            rendezvous_timeout: Duration::from_secs(120),
            kill_grace: Duration::from_secs(10),
        }
    }
}

impl LaunchOptions {
    /// Read overrides (in whole seconds) from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        LaunchOptions {
            rendezvous_timeout: env_secs(keys::RENDEZVOUS_TIMEOUT)
                .unwrap_or(defaults.rendezvous_timeout),
            kill_grace: env_secs(keys::KILL_GRACE).unwrap_or(defaults.kill_grace),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Ambient worker settings, sourced the same way the launch keys are but
/// with a crate-specific prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bound on teardown after a shutdown signal, in seconds.
    pub graceful_shutdown_timeout: u64,
}

impl WorkerConfig {
    /// Instantiates and reads worker configuration from the environment.
    /// Panics on invalid configuration.
    pub fn from_settings() -> Self {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("EELLM_WORKER_"))
            .extract()
            .unwrap() // safety: called on startup, so panic is reasonable
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            graceful_shutdown_timeout: if cfg!(debug_assertions) {
                5 // Debug build: 5 seconds
            } else {
                30 // Release build: 30 seconds
            },
        }
    }
}

fn required_string(vars: &BTreeMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    match vars.get(key) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        Some(_) => Err(ConfigError::Invalid {
            key,
            reason: "value is empty".to_string(),
        }),
        None => Err(ConfigError::Missing(key)),
    }
}

fn required_path(vars: &BTreeMap<String, String>, key: &'static str) -> Result<PathBuf, ConfigError> {
    required_string(vars, key).map(PathBuf::from)
}

fn required_parse<T>(vars: &BTreeMap<String, String>, key: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = required_string(vars, key)?;
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("'{raw}' does not parse: {e}"),
    })
}

fn optional_parse<T>(
    vars: &BTreeMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(_) => required_parse(vars, key),
    }
}

/// Check if an environment variable is truthy
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Check if a string is truthy
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Check whether JSONL logging is enabled
/// Set the `EELLM_LOGGING_JSONL` environment variable to a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy("EELLM_LOGGING_JSONL")
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
/// Set the `EELLM_DISABLE_ANSI_LOGGING` environment variable to a [`is_truthy`] value
pub fn disable_ansi_logging() -> bool {
    env_is_truthy("EELLM_DISABLE_ANSI_LOGGING")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_mapping() -> BTreeMap<String, String> {
        [
            (keys::TOKENIZER_PATH, "/models/tokenizer.model"),
            (keys::CHECKPOINT_PATH, "/models/ckpt"),
            (keys::MASTER_ADDR, "node0"),
            (keys::MASTER_PORT, "6000"),
            (keys::NODE_RANK, "1"),
            (keys::NUM_NODES, "4"),
            (keys::TENSOR_PARALLEL, "2"),
            (keys::PIPELINE_PARALLEL, "4"),
            (keys::SERVICE_PORT, "5005"),
            (keys::RUNTIME_CMD, "/opt/eellm/bin/server"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn resolve_full_mapping() {
        let config = LaunchConfig::resolve(&full_mapping()).unwrap();
        assert_eq!(config.tokenizer_path, PathBuf::from("/models/tokenizer.model"));
        assert_eq!(config.checkpoint_path, PathBuf::from("/models/ckpt"));
        assert_eq!(config.master_addr, "node0");
        assert_eq!(config.master_port, 6000);
        assert_eq!(config.node_rank, 1);
        assert_eq!(config.num_nodes, 4);
        assert_eq!(config.tensor_parallel, 2);
        assert_eq!(config.pipeline_parallel, 4);
        assert_eq!(config.service_port, 5005);
        assert_eq!(config.runtime_cmd, PathBuf::from("/opt/eellm/bin/server"));
    }

    #[test]
    fn resolve_applies_defaults() {
        let mut vars = full_mapping();
        for key in [
            keys::NUM_NODES,
            keys::TENSOR_PARALLEL,
            keys::PIPELINE_PARALLEL,
            keys::SERVICE_PORT,
            keys::RUNTIME_CMD,
        ] {
            vars.remove(key);
        }
        vars.insert(keys::NODE_RANK.to_string(), "0".to_string());
        let config = LaunchConfig::resolve(&vars).unwrap();
        assert_eq!(config.num_nodes, 1);
        assert_eq!(config.tensor_parallel, 1);
        assert_eq!(config.pipeline_parallel, 2);
        assert_eq!(config.service_port, 5000);
        assert_eq!(config.runtime_cmd, PathBuf::from("ee_llm_server"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let vars = full_mapping();
        let first = LaunchConfig::resolve(&vars).unwrap();
        let second = LaunchConfig::resolve(&vars).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn first_missing_key_wins() {
        let mut vars = full_mapping();
        vars.remove(keys::TOKENIZER_PATH);
        vars.remove(keys::MASTER_ADDR);
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err, ConfigError::Missing(keys::TOKENIZER_PATH));
    }

    #[test]
    fn every_required_key_is_named_when_missing() {
        for key in [
            keys::TOKENIZER_PATH,
            keys::CHECKPOINT_PATH,
            keys::MASTER_ADDR,
            keys::MASTER_PORT,
            keys::NODE_RANK,
        ] {
            let mut vars = full_mapping();
            vars.remove(key);
            let err = LaunchConfig::resolve(&vars).unwrap_err();
            assert_eq!(err.key(), key, "expected error naming {key}");
        }
    }

    #[test]
    fn empty_path_is_invalid() {
        let mut vars = full_mapping();
        vars.insert(keys::CHECKPOINT_PATH.to_string(), String::new());
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err.key(), keys::CHECKPOINT_PATH);
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unparsable_port_is_invalid() {
        let mut vars = full_mapping();
        vars.insert(keys::MASTER_PORT.to_string(), "not-a-port".to_string());
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err.key(), keys::MASTER_PORT);
    }

    #[test]
    fn port_above_u16_is_invalid() {
        let mut vars = full_mapping();
        vars.insert(keys::SERVICE_PORT.to_string(), "70000".to_string());
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err.key(), keys::SERVICE_PORT);
    }

    #[test]
    fn zero_parallel_degree_is_invalid() {
        let mut vars = full_mapping();
        vars.insert(keys::TENSOR_PARALLEL.to_string(), "0".to_string());
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err.key(), keys::TENSOR_PARALLEL);
    }

    #[test]
    fn rank_out_of_topology_is_invalid() {
        let mut vars = full_mapping();
        vars.insert(keys::NODE_RANK.to_string(), "4".to_string());
        let err = LaunchConfig::resolve(&vars).unwrap_err();
        assert_eq!(err.key(), keys::NODE_RANK);
    }

    #[test]
    fn rank_zero_is_coordinator() {
        assert_eq!(Role::from_rank(0), Role::Coordinator);
        for rank in 1..16 {
            assert_eq!(Role::from_rank(rank), Role::Worker);
        }
    }

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "on", "yes", "TRUE", "Yes"] {
            assert!(is_truthy(v));
        }
        for v in ["0", "false", "off", "no", ""] {
            assert!(!is_truthy(v));
        }
    }
}
