use std::io;

use crate::types::ProcessGroupId;

/// Signals the lifecycle manager delivers to renderer process groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// Existence check only (signal 0).
    Liveness,
    Terminate,
    Kill,
}

impl GroupSignal {
    fn raw(self) -> libc::c_int {
        match self {
            GroupSignal::Liveness => 0,
            GroupSignal::Terminate => libc::SIGTERM,
            GroupSignal::Kill => libc::SIGKILL,
        }
    }
}

/// Result of a signal delivery that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The group no longer exists. Callers treat this as a completed
    /// termination, never as an error.
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("refusing to signal reserved process group {0}")]
    ReservedGroup(i32),
    #[error("failed to send {signal:?} to process group {pgid}: {source}")]
    Os {
        pgid: ProcessGroupId,
        signal: GroupSignal,
        #[source]
        source: io::Error,
    },
}

/// Delivers signals to whole process groups.
pub trait ProcessGroups: Send + Sync {
    fn signal(&self, pgid: ProcessGroupId, signal: GroupSignal) -> Result<Delivery, SignalError>;

    fn is_alive(&self, pgid: ProcessGroupId) -> Result<bool, SignalError> {
        Ok(self.signal(pgid, GroupSignal::Liveness)? == Delivery::Delivered)
    }
}

/// `killpg(2)` backed implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixProcessGroups;

impl ProcessGroups for UnixProcessGroups {
    fn signal(&self, pgid: ProcessGroupId, signal: GroupSignal) -> Result<Delivery, SignalError> {
        // 0 is our own group and 1 is init's; neither is ever a renderer.
        if pgid.raw() <= 1 {
            return Err(SignalError::ReservedGroup(pgid.raw()));
        }
        let rc = unsafe { libc::killpg(pgid.raw(), signal.raw()) };
        if rc == 0 {
            return Ok(Delivery::Delivered);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(Delivery::NotFound)
        } else {
            Err(SignalError::Os {
                pgid,
                signal,
                source: err,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_reserved_groups() {
        let groups = UnixProcessGroups;
        for raw in [-4, 0, 1] {
            let err = groups
                .signal(ProcessGroupId::new(raw), GroupSignal::Terminate)
                .unwrap_err();
            assert!(matches!(err, SignalError::ReservedGroup(value) if value == raw));
        }
    }

    #[test]
    fn missing_group_is_not_an_error() {
        // pid_max on Linux never exceeds 2^22, so this group cannot exist.
        let groups = UnixProcessGroups;
        let pgid = ProcessGroupId::new(i32::MAX - 7);
        assert_eq!(
            groups.signal(pgid, GroupSignal::Terminate).unwrap(),
            Delivery::NotFound
        );
        assert!(!groups.is_alive(pgid).unwrap());
    }
}
