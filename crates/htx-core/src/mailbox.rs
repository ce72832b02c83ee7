//! Ordered cross-thread task mailboxes.
//!
//! Push appends under the lock; drain swaps the whole list out and returns
//! it with no lock held, so a running task may push follow-up tasks into
//! the same mailbox without deadlocking. Tasks come back in push order;
//! nothing is ordered across different mailboxes.

use std::mem;
use std::sync::Mutex;

/// An ordered mailbox of pending tasks.
pub struct Mailbox<T> {
    tasks: Mutex<Vec<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Appends a task.
    pub fn push(&self, task: T) {
        self.tasks.lock().unwrap().push(task);
    }

    /// Takes every queued task at once, in push order.
    pub fn take(&self) -> Vec<T> {
        mem::take(&mut *self.tasks.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn take_preserves_push_order() {
        let mb = Mailbox::new();
        mb.push(1);
        mb.push(2);
        mb.push(3);
        assert_eq!(mb.take(), vec![1, 2, 3]);
        assert!(mb.is_empty());
        assert!(mb.take().is_empty());
    }

    #[test]
    fn push_while_draining_lands_in_next_batch() {
        let mb: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        mb.push(1);
        let batch = mb.take();
        // A task running from the drained batch can push again freely.
        for _ in batch {
            mb.push(2);
        }
        assert_eq!(mb.take(), vec![2]);
    }

    #[test]
    fn push_from_many_threads() {
        let mb: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mb = Arc::clone(&mb);
                std::thread::spawn(move || mb.push(i))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut got = mb.take();
        got.sort_unstable();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }
}
