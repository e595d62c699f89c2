//! Trailing-edge debounce timer
//!
//! A [`Debouncer`] owns a background task. Every [`Debouncer::trigger`]
//! restarts the quiet window; the action runs once the window passes
//! without a new trigger, receiving the most recent value.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

pub struct Debouncer<T> {
    sender: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the timer task; must be called within a tokio runtime
    pub fn spawn<F>(window: Duration, mut action: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let mut latest = first;
                let mut deadline = Instant::now() + window;
                let mut coalesced = 0usize;
                loop {
                    tokio::select! {
                        next = receiver.recv() => match next {
                            Some(value) => {
                                latest = value;
                                coalesced += 1;
                                deadline = Instant::now() + window;
                            }
                            None => return,
                        },
                        _ = sleep_until(deadline) => break,
                    }
                }
                trace!("Debounce window elapsed after {} coalesced trigger(s)", coalesced);
                action(latest);
            }
        });
        Self { sender, task }
    }

    /// Record a trigger; returns false once the timer has shut down
    pub fn trigger(&self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        // a pending trailing call is discarded
        self.task.abort();
    }
}
