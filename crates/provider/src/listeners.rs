//! Listener bookkeeping shared by the notification sources.

use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedSender;

/// Token returned by a successful subscribe/register.
pub type ListenerId = u64;

/// Ordered set of channel listeners keyed by [`ListenerId`].
///
/// Not synchronized; owners wrap it in their own lock.
#[derive(Debug)]
pub struct ListenerRegistry<T> {
    listeners: BTreeMap<ListenerId, UnboundedSender<T>>,
    next_id: ListenerId,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            listeners: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T: Clone> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, listener: UnboundedSender<T>) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Sends `value` to every listener, pruning the ones whose receiver is
    /// gone. Returns how many listeners received it.
    pub fn broadcast(&mut self, value: T) -> usize {
        self.listeners
            .retain(|_, listener| listener.send(value.clone()).is_ok());
        self.listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
