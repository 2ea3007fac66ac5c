use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub struct StopSignal {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        // Set the 'closing' flag to true
        self.shared.closing.store(true, Ordering::Relaxed);

        // Notify all threads waiting on the condition variable
        let _guard = self.shared.mutex.lock().unwrap(); // Lock briefly to synchronize with waiting threads
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Relaxed)
    }

    /// Sleep for at most `timeout`, returning early (true) if cancelled.
    ///
    /// Used by the decode thread to pace frame delivery while staying
    /// responsive to stop requests.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.cancelled() {
            return true;
        }

        let guard = self.shared.mutex.lock().unwrap();
        let (_guard, _result) = self
            .shared
            .condvar
            .wait_timeout_while(guard, timeout, |_| !self.cancelled())
            .unwrap();

        self.cancelled()
    }
}

// Implementing the Clone trait
impl Clone for StopSignal {
    fn clone(&self) -> StopSignal {
        StopSignal {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_starts_uncancelled() {
        let stop = StopSignal::new();
        assert!(!stop.cancelled());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let stop = StopSignal::new();
        let clone = stop.clone();

        stop.cancel();
        assert!(clone.cancelled());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let stop = StopSignal::new();
        let cancelled = stop.wait_timeout(Duration::from_millis(10));
        assert!(!cancelled);
    }

    #[test]
    fn test_wait_timeout_wakes_on_cancel() {
        let stop = StopSignal::new();
        let waiter = stop.clone();

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        stop.cancel();

        assert!(handle.join().unwrap());
    }
}
