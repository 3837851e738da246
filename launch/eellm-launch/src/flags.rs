// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use eellm_coordinator::config::keys;

/// Launch one node of a multi-node EE-LLM serving job.
///
/// Every flag can also be supplied through the environment variable named
/// in its help text; a flag on the command line wins. Validation happens in
/// the config resolver, not here, so errors always name the offending key.
#[derive(Parser, Debug, Default)]
#[command(name = "eellm-launch", version, about)]
pub struct Flags {
    /// Filesystem path to the tokenizer asset [env: TOKENIZER_PATH]
    #[arg(long)]
    pub tokenizer_path: Option<PathBuf>,

    /// Filesystem path to the model checkpoint directory [env: CHECKPOINT_PATH]
    #[arg(long)]
    pub checkpoint_path: Option<PathBuf>,

    /// Rendezvous host, the coordinator node's address [env: MASTER_ADDR]
    #[arg(long)]
    pub master_addr: Option<String>,

    /// Rendezvous port [env: MASTER_PORT]
    #[arg(long)]
    pub master_port: Option<u16>,

    /// This node's rank, 0 coordinates [env: NODE_RANK]
    #[arg(long)]
    pub node_rank: Option<u32>,

    /// Total node count in the job [env: NUM_NODES]
    #[arg(long)]
    pub num_nodes: Option<u32>,

    /// Tensor-parallel degree [env: TP]
    #[arg(long)]
    pub tensor_parallel: Option<u32>,

    /// Pipeline-parallel degree [env: PP]
    #[arg(long)]
    pub pipeline_parallel: Option<u32>,

    /// Inference-service port exposed by the runtime [env: PORT]
    #[arg(long)]
    pub port: Option<u16>,

    /// Model-runtime executable to launch [env: EELLM_RUNTIME]
    #[arg(long)]
    pub runtime: Option<PathBuf>,
}

impl Flags {
    /// Snapshot the process environment with command-line values layered on
    /// top, ready for the config resolver.
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = std::env::vars().collect();
        let overrides = [
            (
                keys::TOKENIZER_PATH,
                self.tokenizer_path.as_ref().map(|p| p.display().to_string()),
            ),
            (
                keys::CHECKPOINT_PATH,
                self.checkpoint_path.as_ref().map(|p| p.display().to_string()),
            ),
            (keys::MASTER_ADDR, self.master_addr.clone()),
            (keys::MASTER_PORT, self.master_port.map(|v| v.to_string())),
            (keys::NODE_RANK, self.node_rank.map(|v| v.to_string())),
            (keys::NUM_NODES, self.num_nodes.map(|v| v.to_string())),
            (
                keys::TENSOR_PARALLEL,
                self.tensor_parallel.map(|v| v.to_string()),
            ),
            (
                keys::PIPELINE_PARALLEL,
                self.pipeline_parallel.map(|v| v.to_string()),
            ),
            (keys::SERVICE_PORT, self.port.map(|v| v.to_string())),
            (
                keys::RUNTIME_CMD,
                self.runtime.as_ref().map(|p| p.display().to_string()),
            ),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                vars.insert(key.to_string(), value);
            }
        }
        vars
    }
}
