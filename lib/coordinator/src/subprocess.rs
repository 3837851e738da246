// SPDX-FileCopyrightText: Copyright (c) 2025 EE-LLM Launch Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Supervision of the model-runtime subprocess.
//!
//! The runtime is opaque to us: we hand it the launch topology on its
//! command line, forward its output into our logging stream, and watch its
//! exit status. On cancellation it gets SIGTERM, then SIGKILL once the
//! grace period runs out. One child per launcher instance.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::{keys, LaunchConfig};
use crate::report::LaunchOutcome;

/// Prefix identifying runtime log lines in our stream
const LOG_PREFIX: &str = "EELLM";

/// Build the runtime's argument vector. Fixed order, derived 1:1 from the
/// config; the runtime's own defaults are never relied on.
pub fn runtime_args(config: &LaunchConfig) -> Vec<String> {
    vec![
        format!("--tokenizer-path={}", config.tokenizer_path.display()),
        format!("--checkpoint-path={}", config.checkpoint_path.display()),
        format!("--tensor-parallel={}", config.tensor_parallel),
        format!("--pipeline-parallel={}", config.pipeline_parallel),
        format!("--port={}", config.service_port),
        format!("--master-addr={}", config.master_addr),
        format!("--master-port={}", config.master_port),
        format!("--num-nodes={}", config.num_nodes),
        format!("--node-rank={}", config.node_rank),
    ]
}

/// Spawn the runtime and supervise it to completion.
///
/// Returns `Success` or `SubprocessFailure(code)` from the child's own
/// exit, `Cancelled` when `cancel` fires first (after the child has been
/// terminated), or `ConfigError(EELLM_RUNTIME)` when the executable cannot
/// be spawned at all.
pub async fn run_runtime(
    config: &LaunchConfig,
    cancel: &CancellationToken,
    kill_grace: Duration,
) -> LaunchOutcome {
    let rank = config.node_rank;
    let mut child = match Command::new(&config.runtime_cmd)
        .args(runtime_args(config))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Belt for abnormal teardown paths; the normal paths below always
        // reap the child themselves.
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::error!(
                "failed to spawn runtime '{}': {err}",
                config.runtime_cmd.display()
            );
            return LaunchOutcome::ConfigError(keys::RUNTIME_CMD.to_string());
        }
    };

    tracing::info!(
        "runtime started: {} {}",
        config.runtime_cmd.display(),
        runtime_args(config).join(" ")
    );

    forward_output(&mut child, rank);

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) if status.success() => LaunchOutcome::Success,
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    tracing::error!("runtime exited with code {code}");
                    LaunchOutcome::SubprocessFailure(code)
                }
                Err(err) => {
                    tracing::error!("failed waiting on runtime: {err}");
                    LaunchOutcome::SubprocessFailure(-1)
                }
            }
        }
        _ = cancel.cancelled() => {
            terminate(child, kill_grace).await;
            LaunchOutcome::Cancelled
        }
    }
}

/// Forward the child's stdout and stderr line-by-line into our logs.
fn forward_output(child: &mut Child, rank: u32) {
    if let Some(stdout) = child.stdout.take() {
        let reader = tokio::io::BufReader::new(stdout);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!("{LOG_PREFIX}{rank} {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let reader = tokio::io::BufReader::new(stderr);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!("{LOG_PREFIX}{rank} {line}");
            }
        });
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL. Always reaps.
async fn terminate(mut child: Child, kill_grace: Duration) {
    let Some(pid) = child.id() else {
        // Already exited; just collect the status.
        let _ = child.wait().await;
        return;
    };

    tracing::info!("terminating runtime (pid {pid})");
    if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!("failed to SIGTERM runtime: {err}");
    }

    tokio::select! {
        _ = child.wait() => {
            tracing::info!("runtime exited after SIGTERM");
            return;
        }
        _ = tokio::time::sleep(kill_grace) => {
            tracing::warn!("runtime ignored SIGTERM for {kill_grace:?}; killing");
        }
    }

    if let Err(err) = child.start_kill() {
        tracing::error!("failed to kill runtime: {err}");
        return;
    }
    let _ = child.wait().await;
    tracing::info!("runtime killed");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    use tokio::time::Instant;

    fn test_config(runtime_cmd: &std::path::Path) -> LaunchConfig {
        let vars: BTreeMap<String, String> = [
            (keys::TOKENIZER_PATH, "/t"),
            (keys::CHECKPOINT_PATH, "/c"),
            (keys::MASTER_ADDR, "127.0.0.1"),
            (keys::MASTER_PORT, "6000"),
            (keys::NODE_RANK, "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(std::iter::once((
            keys::RUNTIME_CMD.to_string(),
            runtime_cmd.display().to_string(),
        )))
        .collect();
        LaunchConfig::resolve(&vars).unwrap()
    }

    /// Write an executable stub script the launcher can spawn.
    fn stub_runtime(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("stub_runtime.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn argument_vector_is_fixed_and_complete() {
        let config = test_config(std::path::Path::new("ee_llm_server"));
        assert_eq!(
            runtime_args(&config),
            vec![
                "--tokenizer-path=/t",
                "--checkpoint-path=/c",
                "--tensor-parallel=1",
                "--pipeline-parallel=2",
                "--port=5000",
                "--master-addr=127.0.0.1",
                "--master-port=6000",
                "--num-nodes=1",
                "--node-rank=0",
            ]
        );
    }

    #[tokio::test]
    async fn clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_runtime(&dir, "exit 0");
        let config = test_config(&stub);
        let cancel = CancellationToken::new();

        let outcome = run_runtime(&config, &cancel, Duration::from_secs(1)).await;
        assert_eq!(outcome, LaunchOutcome::Success);
    }

    #[tokio::test]
    async fn nonzero_exit_is_propagated_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_runtime(&dir, "exit 7");
        let config = test_config(&stub);
        let cancel = CancellationToken::new();

        let outcome = run_runtime(&config, &cancel, Duration::from_secs(1)).await;
        assert_eq!(outcome, LaunchOutcome::SubprocessFailure(7));
    }

    #[tokio::test]
    async fn missing_executable_is_a_config_error() {
        let config = test_config(std::path::Path::new("/nonexistent/ee_llm_server"));
        let cancel = CancellationToken::new();

        let outcome = run_runtime(&config, &cancel, Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            LaunchOutcome::ConfigError(keys::RUNTIME_CMD.to_string())
        );
    }

    #[tokio::test]
    async fn cancellation_terminates_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let stub = stub_runtime(&dir, "exec sleep 1000");
        let config = test_config(&stub);
        let cancel = CancellationToken::new();
        let kill_grace = Duration::from_secs(1);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let outcome = run_runtime(&config, &cancel, kill_grace).await;
        let elapsed = start.elapsed();

        assert_eq!(outcome, LaunchOutcome::Cancelled);
        // Well within kill-grace + 1s; sleep dies on the SIGTERM.
        assert!(
            elapsed < kill_grace + Duration::from_secs(1),
            "cancellation took {elapsed:?}"
        );
    }
}
