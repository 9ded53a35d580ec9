//! Child-process runner for the model CLI backend.
//!
//! Runs on a blocking thread (the async backend wraps it in `spawn_blocking`).

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the output limit, stdout and stderr combined.
    pub truncated: usize,
    pub timed_out: bool,
    /// Killed because `abort` fired.
    pub aborted: bool,
}

impl CommandOutput {
    /// Last `max_bytes` of stderr as lossy UTF-8, for error messages.
    pub fn stderr_tail(&self, max_bytes: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        if trimmed.len() <= max_bytes {
            return trimmed.to_string();
        }
        let mut start = trimmed.len() - max_bytes;
        while !trimmed.is_char_boundary(start) {
            start += 1;
        }
        format!("...{}", &trimmed[start..])
    }
}

/// Run `cmd` with `stdin`, killing it after `timeout` or once `abort` fires.
///
/// Both pipes are drained on reader threads while the child runs so a chatty
/// child never blocks on a full pipe. At most `output_limit_bytes` of each
/// stream is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    abort: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut aborted = false;
    let status = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let slice = remaining.min(ABORT_POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
        if abort.is_cancelled() {
            warn!("command aborted, killing");
            aborted = true;
        } else if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
        } else {
            continue;
        }
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;
    let truncated = stdout_truncated + stderr_truncated;
    if truncated > 0 {
        warn!(truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, aborted, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
        aborted,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_from_stdin() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        )
        .expect("run cat");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"0123456789"),
            Duration::from_secs(5),
            4,
            &CancellationToken::new(),
        )
        .expect("run cat");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command_with_timeout(
            cmd,
            None,
            Duration::from_millis(100),
            1024,
            &CancellationToken::new(),
        )
        .expect("run sleep");
        assert!(output.timed_out);
        assert!(!output.aborted);
    }

    #[test]
    fn kills_when_aborted() {
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let started = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(30), 1024, &abort)
            .expect("run sleep");
        canceller.join().expect("canceller");
        assert!(output.aborted);
        assert!(!output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo abcdefghij 1>&2");
        let output = run_command_with_timeout(
            cmd,
            None,
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        )
        .expect("run sh");
        assert_eq!(output.stderr_tail(4), "...ghij");
    }
}
