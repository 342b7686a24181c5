use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::error::{FetchError, Result};

/// Shared abort signal for a fetch, with an optional deadline.
///
/// Clones observe the same flag, so a handle kept by a signal handler can stop work running on
/// other threads. Long running steps poll [`Cancellation::check`] between units of work.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same flag, expiring `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with [`FetchError::Cancelled`] or [`FetchError::TimedOut`] once the fetch should stop.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if self.is_expired() {
            return Err(FetchError::TimedOut);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let remote = cancel.clone();
        assert!(cancel.check().is_ok());

        thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(cancel.is_cancelled());
        assert!(matches!(cancel.check(), Err(FetchError::Cancelled)));
    }

    #[test]
    fn test_deadline_expires() {
        let cancel = Cancellation::new().with_timeout(Duration::ZERO);
        assert!(cancel.is_expired());
        assert!(matches!(cancel.check(), Err(FetchError::TimedOut)));

        let cancel = Cancellation::new().with_timeout(Duration::from_secs(3600));
        assert!(cancel.check().is_ok());
    }
}
