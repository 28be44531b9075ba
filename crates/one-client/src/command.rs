//! Running the `one*` command-line tools

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Environment variable the OpenNebula CLI reads its endpoint from
pub const ENV_ONE_XMLRPC: &str = "ONE_XMLRPC";

/// Why a command did not produce usable output
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandFailure {
    /// The process could not be started at all
    #[error("error while running command `{command}` (reason: {source})")]
    Spawn { command: String, source: std::io::Error },
    /// The process exited non-zero
    #[error(
        "error while running command `{command}` (return code: {status}, stdout: {}, stderr: {})",
        .stdout.trim(),
        .stderr.trim()
    )]
    Exit {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    /// The process was killed after the timeout elapsed
    #[error("command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
}

/// Runs control-plane commands with a fixed endpoint and timeout
#[derive(Debug, Clone)]
pub(crate) struct CommandRunner {
    endpoint: Option<String>,
    timeout: Duration,
    /// Directory holding the tools; `PATH` is searched when unset
    tools_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub(crate) fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            tools_dir: None,
        }
    }

    pub(crate) fn with_tools_dir(mut self, tools_dir: Option<PathBuf>) -> Self {
        self.tools_dir = tools_dir;
        self
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn executable(&self, program: &str) -> PathBuf {
        match &self.tools_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }

    /// Run `program args...` and return its stdout.
    ///
    /// `stdin` is fed to the process when given, otherwise stdin is closed.
    /// The child is killed if the timeout elapses.
    pub(crate) async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<String, CommandFailure> {
        let command_line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("Command: {}", command_line);

        let mut command = Command::new(self.executable(program));
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);
        if let Some(endpoint) = &self.endpoint {
            command.env(ENV_ONE_XMLRPC, endpoint);
        }

        let execution = async {
            let mut child = command.spawn()?;
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input).await?;
                // closing the pipe signals end of input to the prompt
                drop(pipe);
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, execution).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CommandFailure::Spawn { command: command_line, source });
            }
            Err(_elapsed) => {
                return Err(CommandFailure::Timeout {
                    command: command_line,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            return Err(CommandFailure::Exit {
                command: command_line,
                status: output.status.to_string(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(stdout)
    }

    /// Whether `program` can be started at all
    pub(crate) async fn probe(&self, program: &str) -> Result<(), CommandFailure> {
        match self.run(program, &["--version".to_string()], None).await {
            // a non-zero exit still proves the binary exists
            Ok(_) | Err(CommandFailure::Exit { .. }) => Ok(()),
            Err(failure) => Err(failure),
        }
    }
}
