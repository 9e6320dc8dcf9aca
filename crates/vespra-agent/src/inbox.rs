use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::event::SupervisorSignal;

/// Bounded mailbox for platform-originated events (§4.1 step 5, §5). Pushing
/// never blocks: on overflow the oldest queued event is dropped rather than
/// applying backpressure to the platform callback. `tokio::sync::mpsc`
/// blocks the sender on a full channel instead of dropping, so this is a
/// small hand-rolled ring buffer over a `Notify` rather than an mpsc channel.
pub struct Inbox {
    buffer: Mutex<VecDeque<SupervisorSignal>>,
    notify: Notify,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
        })
    }

    /// Non-blocking — safe to call from a platform adapter's event callback.
    pub fn push(&self, event: SupervisorSignal) {
        let mut buf = self.buffer.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
            warn!("worker inbox full, dropped oldest queued event");
        }
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
    }

    pub async fn recv(&self) -> SupervisorSignal {
        loop {
            if let Some(event) = self.buffer.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}
