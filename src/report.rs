use crate::phase::Phase;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

/// Result of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// At least one line was read from the child's combined output.
    pub printed_logs: bool,
    /// Exit code, `-N` if killed by signal N, `None` if never reaped.
    pub exit: Option<i32>,
    /// Wall-clock time from spawn to the end of supervision.
    pub runtime: Duration,
    /// SIGINTs sent to the group (0 or 1).
    pub interrupts_sent: u32,
    /// SIGKILLs sent to the group (0 or 1).
    pub kills_sent: u32,
    /// Phase the supervisor ended in.
    pub phase: Phase,
}

/// Collapse an exit status into the reported code.
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| -sig))
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl Report {
    /// Report for a command that could not be started.
    pub fn not_started(runtime: Duration) -> Self {
        Self {
            printed_logs: false,
            exit: None,
            runtime,
            interrupts_sent: 0,
            kills_sent: 0,
            phase: Phase::Terminated,
        }
    }

    /// The summary line, without the leading blank line.
    pub fn summary_line(&self) -> String {
        let exit = match self.exit {
            Some(code) => code.to_string(),
            None => "None".to_string(),
        };
        format!(
            "[debug] printed_logs={} exit={} runtime={:.1}s",
            py_bool(self.printed_logs),
            exit,
            self.runtime.as_secs_f64()
        )
    }
}
