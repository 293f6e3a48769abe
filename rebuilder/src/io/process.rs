//! Helpers for running child processes with timeouts and bounded output tails.

use std::io::Read;
use std::mem;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::tail::TailBuffer;

const READ_CHUNK_BYTES: usize = 8192;
/// How long the readers may keep draining after the child is gone.
///
/// Grandchildren that outlive the child keep the pipes open; past this
/// window the readers are detached and the tails taken as they stand.
const DRAIN_GRACE: Duration = Duration::from_secs(3);

/// Captured child process output. Only the tail of each stream survives.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Exit code, with signal termination mapped to `-1`.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

type SharedTail = Arc<Mutex<TailBuffer>>;

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// The child leads its own process group. Both pipes are drained on their own
/// threads while it runs, keeping only the last `tail_chars` characters of
/// each stream. On timeout the whole group is killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), tail_chars))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    tail_chars: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_tail: SharedTail = Arc::new(Mutex::new(TailBuffer::new(tail_chars)));
    let stderr_tail: SharedTail = Arc::new(Mutex::new(TailBuffer::new(tail_chars)));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(stdout, Arc::clone(&stdout_tail), done_tx.clone());
    spawn_reader(stderr, Arc::clone(&stderr_tail), done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(&mut child);
            child.wait().context("wait command after kill")?
        }
    };
    let elapsed = started.elapsed();

    await_readers(&done_rx, 2, DRAIN_GRACE)?;

    let stdout = take_tail(&stdout_tail)?;
    let stderr = take_tail(&stderr_tail)?;
    let stdout_dropped = stdout.dropped_bytes();
    let stderr_dropped = stderr.dropped_bytes();

    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output trimmed to tail");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout_tail: stdout.into_string(),
        stderr_tail: stderr.into_string(),
        stdout_dropped,
        stderr_dropped,
        timed_out,
        elapsed,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn own_process_group(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child and everything it started. Falls back to the child alone.
fn kill_process_group(child: &mut Child) {
    let pid = child.id().to_string();
    let mut tree_kill = if cfg!(windows) {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/T", "/F", "/PID", pid.as_str()]);
        cmd
    } else {
        let mut cmd = Command::new("kill");
        cmd.args(["-KILL", "--", format!("-{pid}").as_str()]);
        cmd
    };
    let killed = tree_kill
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if !killed {
        warn!(pid = %pid, "process group kill failed, killing child only");
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "child already gone");
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    tail: SharedTail,
    done: mpsc::Sender<Result<()>>,
) {
    thread::spawn(move || {
        let result = read_stream_tail(reader, &tail);
        let _ = done.send(result);
    });
}

/// Wait for `readers` completions, giving up once `grace` has passed.
fn await_readers(
    done: &mpsc::Receiver<Result<()>>,
    readers: usize,
    grace: Duration,
) -> Result<()> {
    let deadline = Instant::now() + grace;
    let mut pending = readers;
    while pending > 0 {
        let left = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(left) {
            Ok(result) => {
                result.context("read output")?;
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(pending, "output pipes still held open, detaching readers");
                return Ok(());
            }
            Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
        }
    }
    Ok(())
}

fn take_tail(tail: &SharedTail) -> Result<TailBuffer> {
    let mut guard = tail
        .lock()
        .map_err(|_| anyhow!("output tail lock poisoned"))?;
    Ok(mem::replace(&mut *guard, TailBuffer::new(0)))
}

fn read_stream_tail<R: Read>(mut reader: R, tail: &Mutex<TailBuffer>) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read output"),
        };
        if n == 0 {
            break;
        }
        tail.lock()
            .map_err(|_| anyhow!("output tail lock poisoned"))?
            .push(&chunk[..n]);
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_code_and_tails() {
        let out = run_command_with_timeout(
            sh("printf 'hello'; printf 'oops' >&2; exit 3"),
            Duration::from_secs(10),
            100,
        )
        .expect("run");
        assert_eq!(out.code(), 3);
        assert_eq!(out.stdout_tail, "hello");
        assert_eq!(out.stderr_tail, "oops");
        assert!(!out.timed_out);
    }

    #[test]
    fn timeout_kills_child() {
        let out = run_command_with_timeout(sh("exec sleep 5"), Duration::from_millis(200), 100)
            .expect("run");
        assert!(out.timed_out);
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_forked_grandchildren() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("echo begin; sleep 6; echo never"),
            Duration::from_millis(300),
            100,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "blocked for {:?}",
            started.elapsed()
        );
        assert_eq!(out.stdout_tail.trim(), "begin");
    }

    #[test]
    fn lingering_grandchild_does_not_hold_a_finished_command() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("sleep 10 & echo done"),
            Duration::from_secs(30),
            100,
        )
        .expect("run");
        assert_eq!(out.code(), 0);
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(out.stdout_tail.trim(), "done");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_command_with_timeout(
            Command::new("/definitely/not/here/tool"),
            Duration::from_secs(1),
            10,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
