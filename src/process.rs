// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! External command execution with streamed output and cancellation

use crate::error::{ProvisionError, Result};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Number of stderr lines kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// A command line to execute
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Run a command to completion, streaming its output to the log.
///
/// A non-zero exit becomes `CommandFailed` carrying the tail of stderr. If
/// `cancel` fires first the child is killed and `Cancelled` is returned.
#[instrument(skip(cmd, cancel), fields(command = %cmd))]
pub async fn run(cmd: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput> {
    if cancel.is_cancelled() {
        return Err(ProvisionError::Cancelled);
    }

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &cmd.envs {
        command.env(key, value);
    }

    debug!("Spawning {}", cmd);
    let mut child = command.spawn().map_err(|e| ProvisionError::CommandFailed {
        command: cmd.to_string(),
        status: "not started".to_string(),
        stderr: e.to_string(),
    })?;

    let stdout = tokio::spawn(stream_lines(
        child.stdout.take(),
        cmd.program.clone(),
        OutputStream::Stdout,
    ));
    let stderr = tokio::spawn(stream_lines(
        child.stderr.take(),
        cmd.program.clone(),
        OutputStream::Stderr,
    ));

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            warn!("Cancelled, killing `{}`", cmd);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{}`: {}", cmd, e);
            }
            return Err(ProvisionError::Cancelled);
        }
    };

    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();

    if !status.success() {
        return Err(ProvisionError::CommandFailed {
            command: cmd.to_string(),
            status: status.to_string(),
            stderr: tail(&stderr, STDERR_TAIL_LINES),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

async fn stream_lines<R>(reader: Option<R>, program: String, stream: OutputStream) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // Read to EOF; invalid UTF-8 is replaced rather than ending the stream
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Stopped reading output of {}: {}", program, e);
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        match stream {
            OutputStream::Stdout => info!(program = %program, "{}", line),
            OutputStream::Stderr => warn!(program = %program, "{}", line),
        }
        captured.push_str(line);
        captured.push('\n');
    }
    captured
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_display_joins_program_and_args() {
        let cmd = CommandSpec::new("kind").args(["create", "cluster", "--name", "e2e"]);
        assert_eq!(cmd.to_string(), "kind create cluster --name e2e");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let output = run(&sh("echo hello; echo oops >&2"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let err = run(&sh("echo broken >&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProvisionError::CommandFailed { command, status, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert!(status.contains('3'));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let err = run(
            &CommandSpec::new("testbed-no-such-binary"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let output = run(
            &sh("echo \"$GREETING $TARGET\"")
                .env("GREETING", "hi")
                .envs([("TARGET", "there")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "hi there\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_drained() {
        let script = "printf 'a\\377b\\n'; sleep 0.2; i=0; \
            while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done";
        let output = run(&sh(script), &CancellationToken::new())
            .await
            .unwrap();

        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines.len(), 20001);
        assert_eq!(lines[0], "a\u{FFFD}b");
        assert_eq!(lines[20000], "line 19999");
    }

    #[tokio::test]
    async fn test_current_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(&sh("pwd").current_dir(dir.path()), &CancellationToken::new())
            .await
            .unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = run(&sh("sleep 30"), &cancel).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run(&sh("exit 0"), &cancel).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
    }
}
