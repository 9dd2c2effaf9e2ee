use crate::config::Timeouts;
use std::time::{Duration, Instant};

/// Where a supervised process is in its bounded lifetime.
///
/// Phases only move forward: `Running -> SoftStopRequested -> HardKillRequested`,
/// and any of them may jump to `Terminated` when the child is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Running,
    SoftStopRequested,
    HardKillRequested,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::SoftStopRequested => "soft-stop-requested",
            Phase::HardKillRequested => "hard-kill-requested",
            Phase::Terminated => "terminated",
        }
    }

    /// Whether output should still be read from the child in this phase.
    pub fn reads_output(&self) -> bool {
        matches!(self, Phase::Running | Phase::SoftStopRequested)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase plus the wall-clock deadline at which it expires.
#[derive(Debug)]
pub struct PhaseClock {
    phase: Phase,
    deadline: Instant,
    timeouts: Timeouts,
}

impl PhaseClock {
    /// Start in `Running`, expiring `timeouts.run` after `start`.
    pub fn start(start: Instant, timeouts: Timeouts) -> Self {
        Self {
            phase: Phase::Running,
            deadline: start + timeouts.run,
            timeouts,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Time left before the current deadline (zero once expired).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// How long the next poll may block: one poll interval, clipped to the deadline.
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.remaining(now).min(self.timeouts.poll_interval)
    }

    /// Escalate to the next timed phase, measuring its budget from `now`.
    ///
    /// Returns the new phase, or `None` when there is nowhere left to escalate.
    pub fn escalate(&mut self, now: Instant) -> Option<Phase> {
        let (next, budget) = match self.phase {
            Phase::Running => (Phase::SoftStopRequested, self.timeouts.soft_stop),
            Phase::SoftStopRequested => (Phase::HardKillRequested, self.timeouts.hard_kill),
            Phase::HardKillRequested | Phase::Terminated => return None,
        };
        self.phase = next;
        self.deadline = now + budget;
        Some(next)
    }

    /// The child has been reaped; nothing else can happen.
    pub fn terminate(&mut self) {
        self.phase = Phase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> Timeouts {
        Timeouts {
            run: Duration::from_secs(25),
            soft_stop: Duration::from_secs(3),
            hard_kill: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_starts_running_with_run_deadline() {
        let start = Instant::now();
        let clock = PhaseClock::start(start, timeouts());
        assert_eq!(clock.phase(), Phase::Running);
        assert!(!clock.expired(start + Duration::from_secs(24)));
        assert!(clock.expired(start + Duration::from_secs(25)));
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let start = Instant::now();
        let mut clock = PhaseClock::start(start, timeouts());

        let t1 = start + Duration::from_secs(25);
        assert_eq!(clock.escalate(t1), Some(Phase::SoftStopRequested));
        assert!(!clock.expired(t1 + Duration::from_secs(2)));
        assert!(clock.expired(t1 + Duration::from_secs(3)));

        let t2 = t1 + Duration::from_secs(3);
        assert_eq!(clock.escalate(t2), Some(Phase::HardKillRequested));
        assert!(clock.expired(t2 + Duration::from_secs(2)));

        assert_eq!(clock.escalate(t2 + Duration::from_secs(2)), None);
        assert_eq!(clock.phase(), Phase::HardKillRequested);
    }

    #[test]
    fn test_terminated_never_escalates() {
        let start = Instant::now();
        let mut clock = PhaseClock::start(start, timeouts());
        clock.terminate();
        assert_eq!(clock.escalate(start), None);
        assert_eq!(clock.phase(), Phase::Terminated);
    }

    #[test]
    fn test_next_wait_is_clipped_to_deadline() {
        let start = Instant::now();
        let clock = PhaseClock::start(start, timeouts());
        assert_eq!(clock.next_wait(start), Duration::from_millis(500));
        let near = start + Duration::from_millis(24_800);
        assert_eq!(clock.next_wait(near), Duration::from_millis(200));
        let past = start + Duration::from_secs(30);
        assert_eq!(clock.next_wait(past), Duration::ZERO);
    }

    #[test]
    fn test_phase_ordering_follows_lifecycle() {
        assert!(Phase::Running < Phase::SoftStopRequested);
        assert!(Phase::SoftStopRequested < Phase::HardKillRequested);
        assert!(Phase::HardKillRequested < Phase::Terminated);
    }

    #[test]
    fn test_only_early_phases_read_output() {
        assert!(Phase::Running.reads_output());
        assert!(Phase::SoftStopRequested.reads_output());
        assert!(!Phase::HardKillRequested.reads_output());
        assert!(!Phase::Terminated.reads_output());
        assert_eq!(Phase::HardKillRequested.to_string(), "hard-kill-requested");
    }
}
