use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
}

impl ExecOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cwd: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Output of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// `None` when the process never ran, was killed, or exited via signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub killed: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.killed
    }

    /// Best available diagnostic: stderr, else stdout, else the exit code.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exit {code}"),
            None if self.killed => "killed".to_string(),
            None => "exit unknown".to_string(),
        }
    }
}

/// Runs external tools (`pi`, `npm`, `git`). Mocked in tests.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(&self, command: &str, args: &[String], options: ExecOptions) -> ExecOutput;
}

/// Default executor using tokio::process::Command.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandExecutor;

#[async_trait]
impl CommandExecutor for TokioCommandExecutor {
    async fn exec(&self, command: &str, args: &[String], options: ExecOptions) -> ExecOutput {
        use tokio::process::Command;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!("Failed to spawn `{command}`: {e}");
                return ExecOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: format!("Failed to run `{command}`: {e}"),
                    killed: false,
                };
            }
        };

        let timeout = options.timeout.unwrap_or(Duration::from_secs(120));
        // Dropping the wait future on timeout kills the child via kill_on_drop.
        tokio::select! {
            result = child.wait_with_output() => match result {
                Ok(output) => ExecOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    killed: false,
                },
                Err(e) => ExecOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    killed: false,
                },
            },
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("`{command}` timed out after {}ms", timeout.as_millis());
                ExecOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {}ms", timeout.as_millis()),
                    killed: true,
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_prefers_stderr_then_stdout() {
        let mut output = ExecOutput {
            code: Some(2),
            stdout: "out".to_string(),
            stderr: "  err \n".to_string(),
            killed: false,
        };
        assert_eq!(output.diagnostic(), "err");
        output.stderr.clear();
        assert_eq!(output.diagnostic(), "out");
        output.stdout.clear();
        assert_eq!(output.diagnostic(), "exit 2");
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_exit() {
        let output = TokioCommandExecutor
            .exec(
                "definitely-not-a-real-binary-xyz",
                &[],
                ExecOptions::default(),
            )
            .await;
        assert!(!output.success());
        assert_eq!(output.code, None);
        assert!(output.stderr.contains("Failed to run"));
    }
}
