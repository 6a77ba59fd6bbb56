use crate::error::{BlastError, BlastResult};
use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A non-zero exit is reported through `CommandOutput::success`; only spawn
/// failures and timeouts are errors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> BlastResult<CommandOutput>;
}

#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> BlastResult<CommandOutput> {
        let rendered = render_command(program, args);
        debug!("Running {}", rendered);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("LC_ALL", "C")
            .env("LANG", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| BlastError::query(&rendered, e.to_string()))?,
            Err(_) => {
                return Err(BlastError::Timeout(format!(
                    "{} did not finish within {:?}",
                    rendered, self.timeout
                )))
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn render_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command() {
        assert_eq!(render_command("apt-mark", &["showmanual"]), "apt-mark showmanual");
        assert_eq!(render_command("true", &[]), "true");
    }

    #[tokio::test]
    async fn test_system_runner_reports_exit_status() {
        let runner = SystemCommandRunner::new(Duration::from_secs(5));
        let ok = runner.run("sh", &["-c", "echo hello"]).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hello");

        let failed = runner.run("sh", &["-c", "echo oops >&2; exit 3"]).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_system_runner_times_out() {
        let runner = SystemCommandRunner::new(Duration::from_millis(100));
        let err = runner.run("sleep", &["5"]).await.unwrap_err();
        assert!(matches!(err, BlastError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_query_failure() {
        let runner = SystemCommandRunner::new(Duration::from_secs(1));
        let err = runner
            .run("definitely-not-a-real-binary-blastradius", &[])
            .await
            .unwrap_err();
        assert!(err.is_query_failure());
    }
}
