use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CapturedStream, ExecutionResult, SandboxFault};

/// How often the supervisor samples the child's peak memory.
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to spawn one supervised subprocess.
pub(super) struct SpawnSpec<'a> {
    pub command: &'a [String],
    pub workdir: &'a Path,
    pub wall_time: Duration,
    /// Ceiling enforced by periodic RSS sampling.
    pub memory_limit_kb: Option<u64>,
    /// Additionally apply the ceiling as `RLIMIT_AS` in pre-exec. Off for VM
    /// runtimes, whose startup virtual reservations dwarf their real use.
    pub hard_address_limit: bool,
    pub output_cap: usize,
}

enum Event {
    Exited(std::process::ExitStatus),
    Deadline,
    MemorySample,
    Cancelled,
}

/// Spawns the command in its own process group and supervises it: races the
/// child against the wall-clock deadline, samples peak memory, caps captured
/// output, and SIGKILLs the whole group on expiry or cancellation.
///
/// Untrusted code is never asked to exit cooperatively; termination is always
/// forced and always targets the full process tree.
pub(super) async fn supervise(
    spec: SpawnSpec<'_>,
    token: &CancellationToken,
) -> Result<ExecutionResult, SandboxFault> {
    let Some((program, args)) = spec.command.split_first() else {
        return Err(SandboxFault::Workspace(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        )));
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(spec.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let memory_limit_kb = spec.memory_limit_kb;
    let address_space_kb = if spec.hard_address_limit {
        spec.memory_limit_kb
    } else {
        None
    };
    // Child-side setup: own process group so the whole tree dies together,
    // plus the optional hard address-space ceiling.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(kb) = address_space_kb {
                let bytes = kb.saturating_mul(1024);
                let limit = libc::rlimit {
                    rlim_cur: bytes,
                    rlim_max: bytes,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxFault::MissingToolchain {
                program: program.clone(),
                source: e,
            }
        } else {
            SandboxFault::Workspace(e)
        }
    })?;

    let pid = child.id().map(|p| p as i32);

    let stdout_pipe = child.stdout.take().ok_or_else(|| {
        SandboxFault::Workspace(std::io::Error::other("child stdout not captured"))
    })?;
    let stderr_pipe = child.stderr.take().ok_or_else(|| {
        SandboxFault::Workspace(std::io::Error::other("child stderr not captured"))
    })?;

    // Drain pipes concurrently so the child never blocks on a full pipe, even
    // when it writes far past the capture cap.
    let cap = spec.output_cap;
    let stdout_task = tokio::spawn(drain_capped(stdout_pipe, cap));
    let stderr_task = tokio::spawn(drain_capped(stderr_pipe, cap));

    let start = Instant::now();
    let deadline = tokio::time::sleep(spec.wall_time);
    tokio::pin!(deadline);
    let mut sampler = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut peak_memory_kb: Option<u64> = None;
    let mut timed_out = false;
    let mut memory_exceeded = false;
    let mut cancelled = false;

    let status = loop {
        let event = tokio::select! {
            res = child.wait() => Event::Exited(res.map_err(SandboxFault::Workspace)?),
            _ = &mut deadline => Event::Deadline,
            _ = token.cancelled() => Event::Cancelled,
            _ = sampler.tick() => Event::MemorySample,
        };

        match event {
            Event::Exited(status) => break Some(status),
            Event::Deadline => {
                timed_out = true;
                kill_group(pid, &mut child).await;
                break None;
            }
            Event::Cancelled => {
                cancelled = true;
                kill_group(pid, &mut child).await;
                break None;
            }
            Event::MemorySample => {
                let Some(pid) = pid else { continue };
                let Some(kb) = peak_rss_kb(pid) else { continue };
                peak_memory_kb = Some(peak_memory_kb.map_or(kb, |p| p.max(kb)));
                if memory_limit_kb.is_some_and(|limit| kb > limit) {
                    memory_exceeded = true;
                    kill_group(Some(pid), &mut child).await;
                    break None;
                }
            }
        }
    };

    let duration = start.elapsed();
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if cancelled {
        return Err(SandboxFault::Cancelled);
    }

    let (exit_code, signal) = match &status {
        Some(status) => {
            use std::os::unix::process::ExitStatusExt;
            (status.code(), status.signal())
        }
        None => (None, None),
    };

    Ok(ExecutionResult {
        exit_code,
        signal,
        timed_out,
        memory_exceeded,
        duration,
        peak_memory_kb,
        stdout,
        stderr,
    })
}

/// SIGKILLs the child's entire process group, falling back to the direct pid
/// if the group is already gone, then reaps the child.
async fn kill_group(pid: Option<i32>, child: &mut Child) {
    if let Some(pid) = pid {
        unsafe {
            if libc::kill(-pid, libc::SIGKILL) != 0 {
                let _ = libc::kill(pid, libc::SIGKILL);
            }
        }
    } else {
        let _ = child.kill().await;
    }
    let _ = child.wait().await;
}

/// Reads a stream to EOF, keeping at most `cap` bytes and marking truncation.
async fn drain_capped(
    mut stream: impl tokio::io::AsyncRead + Unpin,
    cap: usize,
) -> CapturedStream {
    let mut buf = Vec::with_capacity(cap.min(8 * 1024));
    let mut chunk = [0u8; 4096];
    let mut truncated = false;
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            // A kill can tear the pipe down mid-read; what was captured stands.
            Err(_) => break,
        }
    }
    CapturedStream {
        content: String::from_utf8_lossy(&buf).into_owned(),
        truncated,
    }
}

/// Peak resident set size of a live process in KB, from /proc. Best effort:
/// `None` when the process is gone or the platform does not expose it.
fn peak_rss_kb(pid: i32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            return rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse::<u64>()
                .ok();
        }
    }
    None
}
