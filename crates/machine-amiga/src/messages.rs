//! Worker-to-host message queue.
//!
//! A single-producer/single-consumer ring: the worker posts discrete
//! events, the GUI polls them. On overflow the oldest non-essential
//! message is dropped first, so state-transition messages survive bursts
//! of chatter.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

const CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    None,
    PowerOn,
    PowerOff,
    Run,
    Pause,
    Reset,
    Config,
    MemLayout,
    RomMissing,
    WarpOn,
    WarpOff,
    BreakpointReached,
    SnapshotTaken,
    DiskInserted { drive: u8 },
    DiskEjected { drive: u8 },
    DriveMotorOn { drive: u8 },
    DriveMotorOff { drive: u8 },
    PowerLedOn,
    PowerLedOff,
}

impl Message {
    /// Essential messages survive queue overflow.
    #[must_use]
    fn essential(self) -> bool {
        matches!(
            self,
            Self::PowerOn
                | Self::PowerOff
                | Self::Run
                | Self::Pause
                | Self::Reset
                | Self::BreakpointReached
        )
    }
}

/// Clonable handle; all clones feed the same ring.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(CAPACITY))),
        }
    }

    pub fn put(&self, msg: Message) {
        let mut queue = self.inner.lock();
        if queue.len() >= CAPACITY {
            if let Some(pos) = queue.iter().position(|m| !m.essential()) {
                queue.remove(pos);
            } else {
                queue.pop_front();
            }
        }
        queue.push_back(msg);
    }

    /// Next pending message, or [`Message::None`].
    #[must_use]
    pub fn get(&self) -> Message {
        self.inner.lock().pop_front().unwrap_or(Message::None)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_empty_sentinel() {
        let queue = MessageQueue::new();
        queue.put(Message::PowerOn);
        queue.put(Message::Run);
        assert_eq!(queue.get(), Message::PowerOn);
        assert_eq!(queue.get(), Message::Run);
        assert_eq!(queue.get(), Message::None);
    }

    #[test]
    fn overflow_drops_oldest_nonessential_first() {
        let queue = MessageQueue::new();
        queue.put(Message::PowerOn);
        for _ in 0..CAPACITY {
            queue.put(Message::MemLayout);
        }
        // The essential PowerOn must still be at the front.
        assert_eq!(queue.get(), Message::PowerOn);
    }
}
