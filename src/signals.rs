/// Best-effort signal delivery to a supervised child's process group.
///
/// The child is spawned as the leader of its own group, so its pid is also the
/// group id. Delivery tries the whole group first and falls back to the single
/// process; neither failure is ever propagated.
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Which delivery route (if any) accepted the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Group,
    Process,
    Failed,
}

/// Send `sig` to the process group led by `pid`, falling back to `pid` alone.
pub fn signal_group(pid: u32, sig: Signal) -> Delivery {
    // Zero would address our own group.
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            tracing::debug!(pid, signal = %sig, "pid out of range, signal not sent");
            return Delivery::Failed;
        }
    };
    let target = Pid::from_raw(raw);

    match signal::killpg(target, sig) {
        Ok(()) => {
            tracing::info!(pgid = raw, signal = %sig, "signalled process group");
            Delivery::Group
        }
        Err(group_err) => {
            tracing::debug!(pgid = raw, signal = %sig, error = %group_err, "group signal failed, trying process");
            match signal::kill(target, sig) {
                Ok(()) => {
                    tracing::info!(pid = raw, signal = %sig, "signalled process");
                    Delivery::Process
                }
                Err(e) => {
                    tracing::debug!(pid = raw, signal = %sig, error = %e, "signal delivery failed");
                    Delivery::Failed
                }
            }
        }
    }
}
