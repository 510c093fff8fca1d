//! Caller-side cancellation for blocking database work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag set once the caller of a blocking call has gone away.
///
/// The async side keeps a [`CancelGuard`]; the blocking side polls
/// [`is_cancelled`](CancelFlag::is_cancelled) while waiting for a lease and
/// once more before running the statement.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a guard that cancels this flag when dropped, unless it was
    /// [`disarm`](CancelGuard::disarm)ed first.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            flag: self.clone(),
            armed: true,
        }
    }
}

/// Cancels its [`CancelFlag`] on drop.
#[derive(Debug)]
pub struct CancelGuard {
    flag: CancelFlag,
    armed: bool,
}

impl CancelGuard {
    /// The call completed; dropping the guard no longer cancels.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_guard_cancels() {
        let flag = CancelFlag::new();
        drop(flag.drop_guard());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn disarmed_guard_does_not_cancel() {
        let flag = CancelFlag::new();
        flag.drop_guard().disarm();
        assert!(!flag.is_cancelled());
    }
}
