//! One-shot pause lock used to park the simulator thread.

use std::sync::{Condvar, Mutex};

/// One-shot binary semaphore.
///
/// The simulator thread calls [`wait`](RuntimeLock::wait) after reporting a
/// breakpoint hit; the server thread calls [`ready`](RuntimeLock::ready) when
/// the client resumes. A `ready` issued before anyone is waiting arms the
/// lock so the next `wait` returns immediately; redundant `ready` calls
/// coalesce into one.
#[derive(Debug, Default)]
pub struct RuntimeLock {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl RuntimeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the calling thread until a matching [`ready`](Self::ready),
    /// then re-arm the lock for the next round.
    pub fn wait(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.cond.wait(ready).unwrap();
        }
        *ready = false;
    }

    /// Release the waiting thread, or arm the lock if none is waiting yet.
    pub fn ready(&self) {
        let mut ready = self.ready.lock().unwrap();
        if !*ready {
            *ready = true;
            self.cond.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_ready_before_wait_arms_lock() {
        let lock = RuntimeLock::new();
        lock.ready();
        // Must not block: the lock was armed ahead of time.
        lock.wait();
    }

    #[test]
    fn test_ready_coalesces() {
        let lock = RuntimeLock::new();
        lock.ready();
        lock.ready();
        lock.wait();
        // A second wait would block again: spawn a releaser to prove the
        // previous ready calls did not stack up.
        let lock = Arc::new(lock);
        let releaser = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                lock.ready();
            })
        };
        lock.wait();
        releaser.join().unwrap();
    }

    #[test]
    fn test_wait_blocks_until_ready() {
        let lock = Arc::new(RuntimeLock::new());
        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || lock.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        lock.ready();
        waiter.join().unwrap();
    }
}
