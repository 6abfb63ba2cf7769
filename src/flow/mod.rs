//! flow/mod.rs
//!
//! In-memory pub/sub used by every component to fan events out to the
//! host application.
//!
//! A [`DataChannel`] keeps the most recent value, an ordered list of
//! subscriber callbacks and a broadcast sender for async consumers.
//! Callbacks run synchronously on the publishing task, in the order they
//! were registered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use uuid::Uuid;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Lock a std mutex, recovering the guard if a subscriber panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named event channel with registration-ordered callbacks.
pub struct DataChannel<T: Send + Sync + Clone + 'static> {
    name: String,
    latest: Arc<Mutex<Option<T>>>,
    subscribers: Arc<Mutex<Vec<(Uuid, Callback<T>)>>>,
    update_tx: broadcast::Sender<T>,
}

impl<T> DataChannel<T>
where
    T: Send + Sync + Clone + 'static,
{
    /// Create a new channel
    pub fn new(name: &str) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            name: name.to_string(),
            latest: Arc::new(Mutex::new(None)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            update_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the most recently published value
    pub fn latest(&self) -> Option<T> {
        lock(&self.latest).clone()
    }

    /// Store the value and notify subscribers in registration order
    pub fn publish(&self, value: T) {
        *lock(&self.latest) = Some(value.clone());
        let _ = self.update_tx.send(value.clone());

        let subs = lock(&self.subscribers);
        for (_, callback) in subs.iter() {
            callback(&value);
        }
    }

    /// Subscribe to updates. Returns a subscription ID.
    pub fn subscribe(&self, callback: Box<dyn Fn(&T) + Send + Sync>) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.subscribers).push((id, callback));
        id
    }

    /// Unsubscribe. Returns false if the ID was unknown.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = lock(&self.subscribers);
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        subs.len() != before
    }

    /// Receiver for async consumers. Only sees values published after the call.
    pub fn receiver(&self) -> broadcast::Receiver<T> {
        self.update_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Forget the latest value. Subscribers stay registered.
    pub fn clear(&self) {
        *lock(&self.latest) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_in_registration_order() {
        let channel: DataChannel<u32> = DataChannel::new("order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            channel.subscribe(Box::new(move |v| {
                seen.lock().unwrap().push(format!("{}:{}", tag, v));
            }));
        }

        channel.publish(7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:7", "second:7", "third:7"]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let channel: DataChannel<u32> = DataChannel::new("unsub");
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = channel.subscribe(Box::new(move |_| {
            *counter.lock().unwrap() += 1;
        }));

        channel.publish(1);
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.publish(2);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(channel.latest(), Some(2));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_receiver_sees_published_values() {
        let channel: DataChannel<String> = DataChannel::new("async");
        let mut rx = channel.receiver();
        channel.publish("beat".to_string());
        assert_eq!(rx.recv().await.unwrap(), "beat");

        channel.clear();
        assert!(channel.latest().is_none());
    }
}
