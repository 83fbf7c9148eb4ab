//! Channel-backed bus for a single process.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("subscriber list lock poisoned")]
    Poisoned,
}

/// Fans each message out to one `mpsc` channel per subscriber. Channels
/// whose receiver was dropped are forgotten on the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers still registered, counting ones dropped since the last
    /// publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // With a poisoned list the subscription is simply never fed.
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_subscriber_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish("part:new").unwrap();
        bus.publish("part:workflow").unwrap();

        assert_eq!(first.drain(), vec!["part:new", "part:workflow"]);
        assert_eq!(second.drain(), vec!["part:new", "part:workflow"]);
        assert!(first.drain().is_empty());
    }

    #[test]
    fn closed_subscriptions_are_forgotten_on_publish() {
        let bus = InMemoryEventBus::new();
        let open = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(3u8).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(open.try_recv().unwrap(), 3);
    }

    #[test]
    fn nobody_listening_is_not_an_error() {
        let bus: InMemoryEventBus<u8> = InMemoryEventBus::new();
        assert_eq!(bus.publish(7), Ok(()));
    }
}
