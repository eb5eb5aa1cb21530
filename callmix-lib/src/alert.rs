//! Wake-up primitive shared by channel I/O, action queues and mixers.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Edge-style notification built on a generation counter.
///
/// A waiter records [`Alert::generation`] before checking its work sources,
/// then calls [`Alert::wait_since`] with that value. Any notify that landed
/// in between makes the wait return immediately, so wake-ups are never lost.
#[derive(Debug, Default)]
pub struct Alert {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Alert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap()
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    ///
    /// `None` waits without a deadline. Returns `true` when notified.
    pub fn wait_since(&self, seen: u64, timeout: Option<Duration>) -> bool {
        let generation = self.generation.lock().unwrap();
        match timeout {
            Some(timeout) => {
                let (generation, _) = self
                    .cond
                    .wait_timeout_while(generation, timeout, |current| *current == seen)
                    .unwrap();
                *generation != seen
            }
            None => {
                let generation = self
                    .cond
                    .wait_while(generation, |current| *current == seen)
                    .unwrap();
                *generation != seen
            }
        }
    }
}
