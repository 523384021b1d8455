//! Frame delivery to caller callbacks
//!
//! The reading actor never calls user code for data. It pushes frames into a
//! bounded [`DispatchQueue`] and a dedicated dispatcher actor invokes the
//! callbacks in receipt order. When the queue is full the oldest frame is
//! dropped, so a slow consumer costs frames rather than stalling the
//! connection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::message::ControlKind;
use crate::error::Error;

/// Callback for data frames
pub type DataCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
/// Callback for session, connection and per-key errors
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;
/// Callback for one kind of control broadcast
pub type ControlCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A frame on its way to a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Data(Vec<u8>),
    Control(ControlKind, Vec<u8>),
}

/// Bounded FIFO with drop-oldest overflow
#[derive(Debug)]
pub(crate) struct DispatchQueue {
    frames: Mutex<VecDeque<Delivery>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl DispatchQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Delivery>> {
        match self.frames.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueue without waiting. Returns `false` if an older frame was dropped.
    pub(crate) fn push(&self, delivery: Delivery) -> bool {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(delivery);
            evicted
        };
        self.notify.notify_one();

        match evicted {
            Some(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total.is_power_of_two() {
                    tracing::warn!(
                        dropped = total,
                        capacity = self.capacity,
                        "Dispatch queue full, dropping oldest frames"
                    );
                }
                false
            }
            None => true,
        }
    }

    pub(crate) fn try_pop(&self) -> Option<Delivery> {
        self.lock().pop_front()
    }

    /// Wait for the next frame
    pub(crate) async fn pop(&self) -> Delivery {
        loop {
            if let Some(delivery) = self.try_pop() {
                return delivery;
            }
            // notify_one stores a permit, so a push between the check and
            // this await is not lost
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Frames discarded because the consumer fell behind
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the callbacks and drains the queue
pub(crate) struct Dispatcher {
    queue: Arc<DispatchQueue>,
    on_data: DataCallback,
    observers: HashMap<ControlKind, ControlCallback>,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: Arc<DispatchQueue>,
        on_data: DataCallback,
        observers: HashMap<ControlKind, ControlCallback>,
    ) -> Self {
        Self {
            queue,
            on_data,
            observers,
        }
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Data(frame) => (self.on_data)(frame),
            Delivery::Control(kind, frame) => match self.observers.get(&kind) {
                Some(observer) => observer(frame),
                None => tracing::debug!(?kind, "No observer registered, discarding control frame"),
            },
        }
    }

    /// Deliver until cancelled, then drain whatever is still queued
    pub(crate) async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                delivery = self.queue.pop() => self.deliver(delivery),
                _ = cancel.cancelled() => break,
            }
        }

        let mut drained = 0usize;
        while let Some(delivery) = self.queue.try_pop() {
            self.deliver(delivery);
            drained += 1;
        }
        tracing::debug!(drained, "Dispatcher stopped");
    }
}
