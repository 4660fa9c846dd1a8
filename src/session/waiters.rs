use crate::channels::InboundMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use uuid::Uuid;

/// (channel id, user id) a pending text input listens on.
pub type WaitKey = (u64, u64);

struct Pending {
    id: u64,
    menu_id: Uuid,
    sender: oneshot::Sender<InboundMessage>,
}

/// A registered wait. Dropping it without a message arriving leaves the
/// registry entry in place until [`TextWaiters::release`] is called.
pub struct Waiter {
    pub id: u64,
    pub key: WaitKey,
    pub receiver: oneshot::Receiver<InboundMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyWaiting;

/// Routes the next message of one user in one channel to whoever is waiting
/// for it. At most one wait per key.
#[derive(Default)]
pub struct TextWaiters {
    pending: Mutex<HashMap<WaitKey, Pending>>,
    next_id: AtomicU64,
}

impl TextWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        channel_id: u64,
        user_id: u64,
        menu_id: Uuid,
    ) -> Result<Waiter, AlreadyWaiting> {
        let key = (channel_id, user_id);
        let mut pending = self.pending.lock();
        if pending.get(&key).is_some_and(|p| !p.sender.is_closed()) {
            return Err(AlreadyWaiting);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = oneshot::channel();
        pending.insert(
            key,
            Pending {
                id,
                menu_id,
                sender,
            },
        );
        Ok(Waiter { id, key, receiver })
    }

    /// Hand `msg` to the waiter on its (channel, author), if any. Returns the
    /// message back when nobody took it.
    pub fn offer(&self, msg: InboundMessage) -> Option<InboundMessage> {
        let key = (msg.channel_id, msg.author.id);
        let Some(waiter) = self.pending.lock().remove(&key) else {
            return Some(msg);
        };
        waiter.sender.send(msg).err()
    }

    /// Drop the wait `id` on `key`, leaving any newer registration alone.
    pub fn release(&self, key: WaitKey, id: u64) {
        let mut pending = self.pending.lock();
        if pending.get(&key).is_some_and(|p| p.id == id) {
            pending.remove(&key);
        }
    }

    /// Cancel every wait opened from `menu_id`. Returns how many there were.
    pub fn cancel_menu(&self, menu_id: Uuid) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| p.menu_id != menu_id);
        before - pending.len()
    }

    pub fn is_waiting(&self, channel_id: u64, user_id: u64) -> bool {
        self.pending
            .lock()
            .get(&(channel_id, user_id))
            .is_some_and(|p| !p.sender.is_closed())
    }
}
