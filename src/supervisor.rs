/// Bounded-time supervision of one child process.
///
/// The child runs in its own process group with stdout and stderr merged into
/// one pipe. Output is forwarded line by line while the phase clock runs; on
/// expiry the group is interrupted, then killed, then given a short window to
/// be reaped.
use crate::config::Timeouts;
use crate::phase::{Phase, PhaseClock};
use crate::report::{exit_code, Report};
use crate::signals::{signal_group, Delivery};
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

/// Errors that prevent supervision from starting.
#[derive(Debug)]
pub enum SuperviseError {
    /// The argument list was empty.
    EmptyCommand,
    /// Failed to set up the merged output pipe.
    Pipe { source: std::io::Error },
    /// Failed to spawn the child process.
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SuperviseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuperviseError::EmptyCommand => write!(f, "no command to run"),
            SuperviseError::Pipe { source } => {
                write!(f, "failed to create output pipe: {}", source)
            }
            SuperviseError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
        }
    }
}

impl std::error::Error for SuperviseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SuperviseError::EmptyCommand => None,
            SuperviseError::Pipe { source } => Some(source),
            SuperviseError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Reads the child's merged output and forwards it to a sink.
struct OutputPump {
    reader: Option<BufReader<pipe::Receiver>>,
    /// Bytes of the current line; survives cancelled reads.
    pending: Vec<u8>,
    printed: bool,
}

impl OutputPump {
    fn new(receiver: pipe::Receiver) -> Self {
        Self {
            reader: Some(BufReader::new(receiver)),
            pending: Vec::new(),
            printed: false,
        }
    }

    /// Read up to the next newline. Never resolves once the pipe is closed.
    ///
    /// Cancel safe: partially read bytes stay in `pending`.
    async fn read_line(&mut self) -> std::io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_until(b'\n', &mut self.pending).await,
            None => std::future::pending().await,
        }
    }

    /// Forward whatever `read_line` produced; close on EOF or error.
    async fn accept<W: AsyncWrite + Unpin>(&mut self, read: std::io::Result<usize>, sink: &mut W) {
        let closed = match read {
            Ok(0) => {
                tracing::debug!("child output closed");
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(error = %e, "read from child output failed, treating as closed");
                true
            }
        };

        if !self.pending.is_empty() {
            forward(sink, &self.pending).await;
            self.printed = true;
            self.pending.clear();
        }
        if closed {
            self.close();
        }
    }

    /// Forward output already written before exit, for at most `within`.
    async fn drain<W: AsyncWrite + Unpin>(&mut self, sink: &mut W, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        while self.reader.is_some() {
            match tokio::time::timeout_at(deadline, self.read_line()).await {
                Ok(read) => self.accept(read, sink).await,
                Err(_) => {
                    tracing::debug!("output still open after exit, stop draining");
                    break;
                }
            }
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

async fn forward<W: AsyncWrite + Unpin>(sink: &mut W, bytes: &[u8]) {
    if let Err(e) = sink.write_all(bytes).await {
        tracing::debug!(error = %e, "failed to forward child output");
        return;
    }
    if let Err(e) = sink.flush().await {
        tracing::debug!(error = %e, "failed to flush forwarded output");
    }
}

/// Spawn `args` in a new process group with stdout+stderr on one pipe.
fn spawn(
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<(Child, pipe::Receiver), SuperviseError> {
    let (program, rest) = args.split_first().ok_or(SuperviseError::EmptyCommand)?;

    let (reader, writer) = std::io::pipe().map_err(|e| SuperviseError::Pipe { source: e })?;
    let writer_stderr = writer
        .try_clone()
        .map_err(|e| SuperviseError::Pipe { source: e })?;
    // Registered before spawning so a failure here leaves no unsupervised child.
    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))
        .map_err(|e| SuperviseError::Pipe { source: e })?;

    let child = {
        let mut command = Command::new(program);
        command
            .args(rest)
            .envs(env)
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(writer_stderr))
            .process_group(0); // New process group for clean kill
        command.spawn().map_err(|e| SuperviseError::Spawn {
            program: program.clone(),
            source: e,
        })?
        // Dropping `command` closes our copies of the write end, so EOF
        // arrives once every process holding it is gone.
    };

    Ok((child, receiver))
}

/// Run `args` under the bounded timeline and report what happened.
///
/// Writes the `[debug] running:` line and all child output to `sink`. A
/// non-zero or signalled exit is part of the report, not an error.
pub async fn run<W: AsyncWrite + Unpin>(
    args: &[String],
    env: &BTreeMap<String, String>,
    timeouts: Timeouts,
    sink: &mut W,
) -> Result<Report, SuperviseError> {
    let banner = format!("[debug] running: {}\n", args.join(" "));
    forward(sink, banner.as_bytes()).await;

    let start = Instant::now();
    let (mut child, receiver) = spawn(args, env)?;
    let pid = child.id();
    tracing::info!(pid, command = ?args, "supervised process started");

    let mut clock = PhaseClock::start(start, timeouts);
    let mut pump = OutputPump::new(receiver);
    let mut status: Option<ExitStatus> = None;
    let mut interrupts_sent = 0;
    let mut kills_sent = 0;

    while clock.phase().reads_output() {
        let now = Instant::now();

        if clock.expired(now) {
            // A child that exited right at the deadline is not signalled.
            if let Ok(Some(exited)) = child.try_wait() {
                status = Some(exited);
                pump.drain(sink, timeouts.poll_interval).await;
                clock.terminate();
                break;
            }

            match clock.escalate(now) {
                Some(Phase::SoftStopRequested) => {
                    tracing::info!(pid, phase = %clock.phase(), "run timeout reached, interrupting");
                    interrupts_sent += 1;
                    send(pid, Signal::SIGINT, &mut child);
                }
                Some(Phase::HardKillRequested) => {
                    tracing::info!(pid, phase = %clock.phase(), "soft-stop timeout reached, killing");
                    kills_sent += 1;
                    send(pid, Signal::SIGKILL, &mut child);
                }
                _ => {}
            }
            continue;
        }

        let wait = clock.next_wait(now);
        tokio::select! {
            biased;
            read = pump.read_line() => pump.accept(read, sink).await,
            exited = child.wait() => {
                match exited {
                    Ok(exited) => status = Some(exited),
                    Err(e) => tracing::debug!(error = %e, "wait on child failed"),
                }
                pump.drain(sink, timeouts.poll_interval).await;
                clock.terminate();
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    if clock.phase() == Phase::HardKillRequested {
        pump.close();
        match tokio::time::timeout(clock.remaining(Instant::now()), child.wait()).await {
            Ok(Ok(exited)) => {
                status = Some(exited);
                clock.terminate();
            }
            Ok(Err(e)) => tracing::debug!(error = %e, "wait on killed child failed"),
            Err(_) => tracing::warn!(pid, "child not reaped after kill"),
        }
    }
    pump.close();

    let report = Report {
        printed_logs: pump.printed,
        exit: status.and_then(exit_code),
        runtime: start.elapsed(),
        interrupts_sent,
        kills_sent,
        phase: clock.phase(),
    };
    tracing::info!(
        exit = ?report.exit,
        printed_logs = report.printed_logs,
        runtime_secs = report.runtime.as_secs_f64(),
        interrupts = report.interrupts_sent,
        kills = report.kills_sent,
        phase = %report.phase,
        "supervision finished"
    );
    Ok(report)
}

/// Signal the child's group, or the child handle itself if no pid is known.
fn send(pid: Option<u32>, sig: Signal, child: &mut Child) {
    let delivered = match pid {
        Some(pid) => signal_group(pid, sig),
        None => Delivery::Failed,
    };
    if delivered == Delivery::Failed && sig == Signal::SIGKILL {
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "direct kill failed");
        }
    }
}
