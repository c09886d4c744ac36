use super::{FetchError, ToolInvocation, ToolOutcome, ToolRunner};
use crate::hash::sha256_hex;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RunnerLimits {
    pub timeout_ms: u64,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 1_800_000,
            max_stdout_bytes: 20_000,
            max_stderr_bytes: 20_000,
        }
    }
}

#[derive(Debug, Default)]
struct TailBuffer {
    max: usize,
    buf: Vec<u8>,
}

impl TailBuffer {
    fn new(max: usize) -> Self {
        Self { max, buf: vec![] }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.max == 0 {
            return;
        }
        if chunk.len() >= self.max {
            self.buf.clear();
            self.buf
                .extend_from_slice(&chunk[chunk.len().saturating_sub(self.max)..]);
            return;
        }
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max {
            let excess = self.buf.len() - self.max;
            self.buf.drain(0..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[derive(Debug)]
struct StreamCapture {
    tail: String,
    total_bytes: usize,
    sha256: String,
}

impl StreamCapture {
    fn placeholder(tail: String) -> Self {
        Self {
            tail,
            total_bytes: 0,
            sha256: sha256_hex(&[]),
        }
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(
    mut r: R,
    max_tail: usize,
) -> std::io::Result<StreamCapture> {
    let mut tail = TailBuffer::new(max_tail);
    let mut hasher = Sha256::new();
    let mut total_bytes = 0usize;
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = r.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        tail.push(chunk);
        hasher.update(chunk);
        total_bytes += n;
    }

    Ok(StreamCapture {
        tail: tail.into_string(),
        total_bytes,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Build tools may leave grandchildren holding the pipes open after a kill,
/// so capture tasks get a short grace period and are then abandoned.
async fn finalize_capture_task(
    task: &mut tokio::task::JoinHandle<std::io::Result<StreamCapture>>,
    stream_name: &str,
    timed_out: bool,
) -> std::io::Result<StreamCapture> {
    let joined = if timed_out {
        match tokio::time::timeout(Duration::from_millis(250), &mut *task).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                task.abort();
                None
            }
        }
    } else {
        Some(task.await)
    };

    match joined {
        Some(Ok(Ok(capture))) => Ok(capture),
        Some(Ok(Err(err))) => Err(err),
        Some(Err(_join_err)) => Ok(StreamCapture::placeholder(format!(
            "<{stream_name} join error>"
        ))),
        None => Ok(StreamCapture::placeholder(format!(
            "<{stream_name} capture aborted after timeout>"
        ))),
    }
}

pub async fn run_command(
    invocation: &ToolInvocation,
    limits: &RunnerLimits,
) -> std::io::Result<ToolOutcome> {
    let start = Instant::now();
    let mut cmd = tokio::process::Command::new(&invocation.program);
    cmd.args(&invocation.args);
    if let Some(cwd) = &invocation.cwd {
        cmd.current_dir(cwd);
    }
    if !invocation.env.is_empty() {
        cmd.envs(invocation.env.clone());
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    debug!(program = %invocation.program.display(), args = ?invocation.args, "spawning");
    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout is not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr is not captured"))?;

    let mut stdout_task = tokio::spawn(read_stream(stdout, limits.max_stdout_bytes));
    let mut stderr_task = tokio::spawn(read_stream(stderr, limits.max_stderr_bytes));

    let timeout = Duration::from_millis(limits.timeout_ms);
    let mut timed_out = false;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(res) => res?,
        Err(_) => {
            timed_out = true;
            let _ = child.kill().await;
            child.wait().await?
        }
    };

    let stdout = finalize_capture_task(&mut stdout_task, "stdout", timed_out).await?;
    let stderr = finalize_capture_task(&mut stderr_task, "stderr", timed_out).await?;

    Ok(ToolOutcome {
        success: status.success() && !timed_out,
        exit_code: status.code(),
        timed_out,
        duration_ms: start.elapsed().as_millis() as u64,
        stdout_tail: stdout.tail,
        stderr_tail: stderr.tail,
        stdout_bytes: stdout.total_bytes,
        stderr_bytes: stderr.total_bytes,
        stdout_sha256: stdout.sha256,
        stderr_sha256: stderr.sha256,
    })
}

/// Runs tools as child processes on the tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    pub limits: RunnerLimits,
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, FetchError> {
        run_command(invocation, &self.limits)
            .await
            .map_err(|source| FetchError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn read_stream_reports_total_bytes_tail_and_hash() {
        let payload = b"abcdef".to_vec();
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            tx.write_all(&payload).await.expect("write payload");
        });

        let capture = read_stream(rx, 3).await.expect("capture stream");
        assert_eq!(capture.total_bytes, 6);
        assert_eq!(capture.tail, "def");
        assert_eq!(capture.sha256, sha256_hex(b"abcdef"));
    }

    #[test]
    fn tail_buffer_keeps_the_last_bytes() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"ab");
        tail.push(b"cdef");
        assert_eq!(tail.into_string(), "cdef");
        let mut tail = TailBuffer::new(0);
        tail.push(b"ignored");
        assert_eq!(tail.into_string(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_and_cwd_are_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let invocation = ToolInvocation {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "pwd; exit 3".to_string()],
            cwd: Some(dir.path().to_path_buf()),
            env: Default::default(),
        };
        let outcome = run_command(&invocation, &RunnerLimits::default())
            .await
            .expect("run sh");
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        let name = dir.path().file_name().expect("dir name").to_string_lossy();
        assert!(outcome.stdout_tail.contains(name.as_ref()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_returns_even_if_descendants_keep_pipes_open() {
        let invocation = ToolInvocation {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "(sleep 5) & while true; do sleep 1; done".to_string(),
            ],
            cwd: None,
            env: Default::default(),
        };
        let limits = RunnerLimits {
            timeout_ms: 100,
            ..RunnerLimits::default()
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            run_command(&invocation, &limits),
        )
        .await
        .expect("runner must return promptly on timeout")
        .expect("outcome");

        assert!(outcome.timed_out);
        assert!(!outcome.success);
    }
}
