//! Site generator executors.
//!
//! Both variants take a source tree and an output directory. The command
//! executor runs the generator directly; the container executor runs it in
//! a throwaway container with no network, no capabilities and a memory
//! ceiling. Generator output is forwarded to tracing line by line.

use crate::error::ExecutorError;
use async_trait::async_trait;
use sitehist_core::config::GeneratorConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Flags every generator run gets, ahead of configured args.
pub const SAFETY_FLAGS: &[&str] = &["--no-watch", "--safe"];

const CONTAINER_SRC: &str = "/srv/src";
const CONTAINER_DST: &str = "/srv/dst";

/// Renders `src` into `dst`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn build(&self, src: &Path, dst: &Path) -> Result<(), ExecutorError>;
}

/// Build the executor described by `config`.
pub fn from_config(config: &GeneratorConfig, timeout: Duration) -> Arc<dyn Executor> {
    match config {
        GeneratorConfig::Command { program, args, env } => Arc::new(CommandExecutor {
            program: program.clone(),
            args: args.clone(),
            env: env.clone(),
            timeout,
        }),
        GeneratorConfig::Container {
            runtime,
            image,
            memory_limit_bytes,
            args,
            env,
        } => Arc::new(ContainerExecutor {
            runtime: runtime.clone(),
            image: image.clone(),
            memory_limit_bytes: *memory_limit_bytes,
            args: args.clone(),
            env: env.clone(),
            timeout,
        }),
    }
}

/// Runs the generator as a direct child process.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    /// Arguments after the program name.
    pub fn command_args(&self, src: &Path, dst: &Path) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--source".to_string(),
            src.display().to_string(),
            "--destination".to_string(),
            dst.display().to_string(),
        ];
        args.extend(SAFETY_FLAGS.iter().map(|f| f.to_string()));
        args.extend(self.args.iter().cloned());
        args
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn build(&self, src: &Path, dst: &Path) -> Result<(), ExecutorError> {
        tokio::fs::create_dir_all(dst).await?;

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(src, dst))
            .current_dir(src)
            .env_clear()
            .envs(&self.env);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        run_logged(cmd, &self.program, self.timeout).await
    }
}

/// Runs the generator in a sandboxed container via a docker-compatible CLI.
#[derive(Clone, Debug)]
pub struct ContainerExecutor {
    pub runtime: String,
    pub image: String,
    pub memory_limit_bytes: u64,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ContainerExecutor {
    /// Arguments to the container runtime for one run.
    pub fn run_args(&self, name: &str, src: &Path, dst: &Path) -> Vec<String> {
        let memory = self.memory_limit_bytes.to_string();
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--name",
            name,
            "--network",
            "none",
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
            "--memory",
            memory.as_str(),
            "--memory-swap",
            memory.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-v".to_string());
        args.push(format!("{}:{CONTAINER_SRC}:ro", src.display()));
        args.push("-v".to_string());
        args.push(format!("{}:{CONTAINER_DST}", dst.display()));
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args.extend(
            ["jekyll", "build", "-s", CONTAINER_SRC, "-d", CONTAINER_DST]
                .iter()
                .map(|s| s.to_string()),
        );
        args.extend(SAFETY_FLAGS.iter().map(|f| f.to_string()));
        args.extend(self.args.iter().cloned());
        args
    }

    /// Force-remove a container that outlived its client.
    async fn remove(&self, name: &str) {
        let result = Command::new(&self.runtime)
            .args(["rm", "--force", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(container = name, "removed container"),
            Ok(status) => warn!(container = name, %status, "container removal failed"),
            Err(e) => warn!(container = name, error = %e, "container removal failed"),
        }
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn build(&self, src: &Path, dst: &Path) -> Result<(), ExecutorError> {
        tokio::fs::create_dir_all(dst).await?;

        let name = format!("sitehist-{}", uuid::Uuid::new_v4().simple());
        let mut cmd = Command::new(&self.runtime);
        cmd.args(self.run_args(&name, src, dst));

        let result = run_logged(cmd, &self.runtime, self.timeout).await;
        if matches!(result, Err(ExecutorError::Timeout { .. })) {
            self.remove(&name).await;
        }
        result
    }
}

/// Run to completion or timeout, forwarding output to tracing.
async fn run_logged(mut cmd: Command, program: &str, timeout: Duration) -> Result<(), ExecutorError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
        program: program.to_string(),
        source,
    })?;
    debug!(program, pid = child.id(), "generator started");

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward_lines(out, program.to_string(), false)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward_lines(err, program.to_string(), true)));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "failed to kill timed out generator");
            }
            return Err(ExecutorError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    for task in [stdout, stderr].into_iter().flatten() {
        let _ = task.await;
    }

    if !status.success() {
        return Err(ExecutorError::ExitStatus {
            program: program.to_string(),
            status,
        });
    }
    Ok(())
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, program: String, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(program = %program, "{line}");
        } else {
            info!(program = %program, "{line}");
        }
    }
}
