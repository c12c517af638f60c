//! Helpers for running child processes with timeouts and bounded output.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// True when the child exited zero before its deadline.
    #[cfg(test)]
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Lossy stdout text. Dropped bytes show up as a marker between head and tail.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy stderr text. Dropped bytes show up as a marker between head and tail.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs, and stdin is fed from its own thread so a
/// child that writes before it finishes reading cannot block us. `output_limit_bytes` bounds the
/// stdout/stderr stored in memory per stream: the first half and the last half are kept, and the
/// middle is replaced with a marker while the pipe keeps draining.
/// On timeout the child is killed and `timed_out` is set; that is not an error.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()));
        }
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // Dropping the handle at the end of the thread closes the pipe.
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(err = %e, "failed to write stdin"),
            Err(_) => warn!("stdin writer thread panicked"),
        }
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader`, keeping at most `limit` bytes: the head half and a rolling tail.
///
/// Returns the kept bytes (with a marker where the middle was dropped) and the
/// number of bytes dropped.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let head_limit = limit / 2;
    let tail_limit = limit - head_limit;
    let mut head = Vec::new();
    let mut tail: VecDeque<u8> = VecDeque::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let to_head = n.min(head_limit.saturating_sub(head.len()));
        head.extend_from_slice(&chunk[..to_head]);
        tail.extend(&chunk[to_head..n]);
        if tail.len() > tail_limit {
            let excess = tail.len() - tail_limit;
            tail.drain(..excess);
            truncated += excess;
        }
    }

    if truncated > 0 {
        head.extend_from_slice(format!("\n[... {truncated} bytes truncated ...]\n").as_bytes());
    }
    head.extend(tail);
    Ok((head, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_captured_output_to_head_and_tail() {
        let mut data = vec![b'a'; 10_000];
        data.extend(vec![b'z'; 10_000]);
        let (buf, truncated) = read_stream_limited(&data[..], 1_000).expect("read");
        assert_eq!(truncated, 19_000);
        let text = String::from_utf8(buf).expect("ascii");
        assert!(text.starts_with(&"a".repeat(500)));
        assert!(text.ends_with(&"z".repeat(500)));
        assert!(text.contains("[... 19000 bytes truncated ...]"));
    }

    #[test]
    fn output_within_limit_is_untouched() {
        let (buf, truncated) = read_stream_limited(&b"short"[..], 1_000).expect("read");
        assert_eq!(truncated, 0);
        assert_eq!(buf, b"short");
    }

    #[cfg(unix)]
    #[test]
    fn error_after_long_output_survives_truncation() {
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            "i=0; while [ $i -lt 4000 ]; do echo \"tests/test_x.py::test_$i PASSED\"; i=$((i+1)); done; \
             echo \"E   ModuleNotFoundError: No module named 'yaml'\"",
        ]);
        let out =
            run_command_with_timeout(cmd, None, Duration::from_secs(30), 10_000).expect("run");
        assert!(out.stdout_truncated > 0);
        let text = out.stdout_text();
        assert!(text.starts_with("tests/test_x.py::test_0 PASSED"));
        assert!(text.contains("bytes truncated"));
        assert!(text.contains("No module named 'yaml'"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let out = run_command_with_timeout(cmd, None, Duration::from_secs(10), 1_000).expect("run");
        assert!(!out.succeeded());
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout_text().trim(), "hello");
        assert_eq!(out.stderr_text().trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn pipes_stdin_to_child() {
        let cmd = Command::new("cat");
        let out = run_command_with_timeout(cmd, Some(b"piped"), Duration::from_secs(10), 1_000)
            .expect("run");
        assert!(out.succeeded());
        assert_eq!(out.stdout_text(), "piped");
    }

    #[cfg(unix)]
    #[test]
    fn large_stdin_with_echoing_child_does_not_deadlock() {
        let input = vec![b'q'; 1 << 20];
        let cmd = Command::new("cat");
        let out = run_command_with_timeout(cmd, Some(&input), Duration::from_secs(20), 1_000)
            .expect("run");
        assert!(!out.timed_out);
        assert!(out.succeeded());
        assert_eq!(out.stdout_truncated, (1 << 20) - 1_000);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_command_with_timeout(cmd, None, Duration::from_millis(200), 1_000)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let cmd = Command::new("definitely-not-a-real-program-xyz");
        let err = run_command_with_timeout(cmd, None, Duration::from_secs(1), 100)
            .expect_err("spawn should fail");
        assert!(err.to_string().contains("spawn"));
    }
}
