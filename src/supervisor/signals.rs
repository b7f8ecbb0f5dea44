//! Signal mask handling and exit status mapping

use nix::sys::signal::{SigSet, Signal};
use nix::sys::wait::WaitStatus;

use crate::common::constants::exit;

/// Signals the supervisor consumes synchronously
pub const SUPERVISED: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGCHLD,
];

/// Signals relayed from the supervisor to the worker, and turned into
/// shutdown events inside the worker
pub const TERMINATING: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGQUIT,
];

pub fn supervised_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in SUPERVISED {
        set.add(signal);
    }
    set
}

/// Block the supervised signals on the calling thread. Must run before any
/// other thread exists so every thread inherits the mask.
pub fn block_supervised() -> nix::Result<SigSet> {
    let set = supervised_set();
    set.thread_block()?;
    Ok(set)
}

pub fn is_terminating(signal: Signal) -> bool {
    TERMINATING.contains(&signal)
}

pub fn signal_exit_code(signal: i32) -> i32 {
    exit::SIGNAL_BASE + signal
}

/// Exit code for a reaped child, `None` while it is still running
pub fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(signal_exit_code(signal as i32)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_supervised_set_contents() {
        let set = supervised_set();
        for signal in SUPERVISED {
            assert!(set.contains(signal));
        }
        assert!(!set.contains(Signal::SIGUSR1));
        assert!(!set.contains(Signal::SIGPIPE));
    }

    #[test]
    fn test_sigchld_is_not_forwarded() {
        assert!(is_terminating(Signal::SIGTERM));
        assert!(is_terminating(Signal::SIGHUP));
        assert!(!is_terminating(Signal::SIGCHLD));
    }

    #[test]
    fn test_exit_code_mapping() {
        let pid = Pid::from_raw(42);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 0)), Some(0));
        assert_eq!(exit_code(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            exit_code(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some(143)
        );
        assert_eq!(
            exit_code(WaitStatus::Signaled(pid, Signal::SIGKILL, true)),
            Some(137)
        );
        assert_eq!(exit_code(WaitStatus::StillAlive), None);
        assert_eq!(exit_code(WaitStatus::Stopped(pid, Signal::SIGSTOP)), None);
    }
}
