//! One-shot job completion with a bounded wait
//!
//! A device gets the [`Completer`] half when a job is submitted and the
//! caller keeps the [`JobTicket`]. The ticket waits at most the timeout; a
//! result posted after that is dropped together with the job's buffers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

struct Slot<T> {
    value: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

/// Device side of a submitted job
pub struct Completer<T> {
    slot: Arc<Slot<T>>,
    posted: bool,
}

/// Caller side of a submitted job
pub struct JobTicket<T> {
    slot: Arc<Slot<T>>,
}

/// Create a linked completer/ticket pair
pub fn job_channel<T>() -> (Completer<T>, JobTicket<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Arc::clone(&slot),
            posted: false,
        },
        JobTicket { slot },
    )
}

impl<T> Completer<T> {
    /// Post the job result and wake the waiter
    pub fn complete(mut self, result: Result<T>) {
        self.post(result);
    }

    fn post(&mut self, result: Result<T>) {
        if self.posted {
            return;
        }
        self.posted = true;
        *self.slot.value.lock() = Some(result);
        self.slot.ready.notify_one();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.post(Err(Error::job("job abandoned by device")));
    }
}

impl<T> JobTicket<T> {
    /// Block until the job completes or `timeout` elapses
    ///
    /// # Errors
    /// `JobTimeout` if nothing was posted in time, otherwise whatever the
    /// device reported.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut value = self.slot.value.lock();
        while value.is_none() {
            if self.slot.ready.wait_until(&mut value, deadline).timed_out() {
                break;
            }
        }
        value.take().unwrap_or(Err(Error::JobTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }))
    }

    /// Check for a posted result without blocking
    pub fn is_complete(&self) -> bool {
        self.slot.value.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_completed_before_wait() {
        let (completer, ticket) = job_channel::<u32>();
        completer.complete(Ok(7));
        assert!(ticket.is_complete());
        assert_eq!(ticket.wait(Duration::from_millis(10)).unwrap(), 7);
    }

    #[test]
    fn test_completed_from_other_thread() {
        let (completer, ticket) = job_channel::<u32>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(42));
        });
        assert_eq!(ticket.wait(Duration::from_secs(5)).unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_timeout() {
        let (_completer, ticket) = job_channel::<u32>();
        let start = Instant::now();
        let err = ticket.wait(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::JobTimeout { timeout_ms: 50 }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_abandoned_job_reports_error() {
        let (completer, ticket) = job_channel::<u32>();
        drop(completer);
        assert!(matches!(
            ticket.wait(Duration::from_secs(5)),
            Err(Error::JobError(_))
        ));
    }

    #[test]
    fn test_late_completion_is_harmless() {
        let (completer, ticket) = job_channel::<Vec<u8>>();
        assert!(ticket.wait(Duration::from_millis(5)).is_err());
        completer.complete(Ok(vec![1, 2, 3]));
    }
}
