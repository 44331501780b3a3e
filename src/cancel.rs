//! Cancellation predicates for blocking socket operations.
//!
//! Every blocking read performed by the endpoint is handed a [`CancellationRequest`] and polls it
//! between socket waits. A predicate fires when its deadline elapses or when the endpoint's stop
//! flag is raised from another thread, so no read can outlive `stop()` by more than one socket
//! poll interval.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// A query answering whether an in-progress blocking operation should abort.
pub trait CancellationRequest {
    /// Returns `true` once the operation must give up.
    fn is_cancellation_requested(&self) -> bool;
}

impl<F> CancellationRequest for F
where
    F: Fn() -> bool,
{
    #[inline]
    fn is_cancellation_requested(&self) -> bool {
        self()
    }
}

/// Cancellation that never fires.
///
/// Used for writes of complete HTTP responses, which are not bounded by a deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl CancellationRequest for Never {
    #[inline]
    fn is_cancellation_requested(&self) -> bool {
        false
    }
}

/// Cancellation that fires when a shared stop flag is raised.
#[derive(Debug, Clone)]
pub struct StopFlag(pub Arc<AtomicBool>);

impl CancellationRequest for StopFlag {
    #[inline]
    fn is_cancellation_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cancellation that fires once a deadline has passed or a stop flag has been raised.
///
/// Created with [`make_cancellation_request_with_timeout`].
#[derive(Debug, Clone)]
pub struct TimeoutCancellation {
    deadline: Instant,
    stop: Arc<AtomicBool>,
}

impl TimeoutCancellation {
    /// The instant after which the predicate reports cancellation.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl CancellationRequest for TimeoutCancellation {
    #[inline]
    fn is_cancellation_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire) || Instant::now() >= self.deadline
    }
}

/// Builds a predicate that becomes true `timeout` from now, or as soon as `stop` is set.
///
/// # Example
/// ```
/// use std::{sync::{atomic::AtomicBool, Arc}, time::Duration};
/// use tether::cancel::{make_cancellation_request_with_timeout, CancellationRequest};
///
/// let stop = Arc::new(AtomicBool::new(false));
/// let cancel = make_cancellation_request_with_timeout(Duration::from_secs(5), &stop);
/// assert!(!cancel.is_cancellation_requested());
/// ```
pub fn make_cancellation_request_with_timeout(
    timeout: Duration,
    stop: &Arc<AtomicBool>,
) -> TimeoutCancellation {
    TimeoutCancellation {
        deadline: Instant::now() + timeout,
        stop: Arc::clone(stop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_fires_after_deadline() {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = make_cancellation_request_with_timeout(Duration::from_millis(20), &stop);
        assert!(!cancel.is_cancellation_requested());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cancel.is_cancellation_requested());
    }

    #[test]
    fn test_stop_flag_fires_before_deadline() {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = make_cancellation_request_with_timeout(Duration::from_secs(60), &stop);

        let remote = Arc::clone(&stop);
        std::thread::spawn(move || remote.store(true, Ordering::Release))
            .join()
            .unwrap();

        assert!(cancel.is_cancellation_requested());
    }

    #[test]
    fn test_zero_timeout_is_already_cancelled() {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = make_cancellation_request_with_timeout(Duration::ZERO, &stop);
        assert!(cancel.is_cancellation_requested());
    }

    #[test]
    fn test_closures_and_never() {
        assert!(!Never.is_cancellation_requested());
        assert!((|| true).is_cancellation_requested());

        let flag = StopFlag(Arc::new(AtomicBool::new(false)));
        assert!(!flag.is_cancellation_requested());
        flag.0.store(true, Ordering::Release);
        assert!(flag.is_cancellation_requested());
    }
}
