//! Change events and the per-replicant change bus.
//!
//! Each replicant fans `change` events out to its subscribers over
//! bounded channels. A subscriber that stops draining its queue is
//! dropped rather than allowed to stall the flush path.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde_json::Value;

use crate::core::Operation;

/// One flushed batch, as seen by a local subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub value: Option<Value>,
    /// Absent on declaration events and on the synthetic event delivered
    /// to late subscribers.
    pub old_value: Option<Value>,
    pub revision: u64,
    pub operations: Vec<Operation>,
}

pub struct ChangeSubscription {
    receiver: Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn recv(&self) -> Result<ChangeEvent, crossbeam::channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<ChangeEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ChangeEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

pub struct ChangeBus {
    capacity: usize,
    subscribers: Vec<Sender<ChangeEvent>>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> ChangeSubscription {
        self.subscribe_with(None)
    }

    /// Subscribe, optionally seeding the new subscriber's queue with a
    /// snapshot event before it joins the fan-out.
    pub fn subscribe_with(&mut self, initial: Option<ChangeEvent>) -> ChangeSubscription {
        let (sender, receiver) = crossbeam::channel::bounded(self.capacity);
        if let Some(event) = initial {
            let _ = sender.try_send(event);
        }
        self.subscribers.push(sender);
        ChangeSubscription { receiver }
    }

    pub fn publish(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|sender| {
            match sender.try_send(event.clone()) {
                Ok(()) => true,
                // Lagged or gone; either way the subscriber is detached.
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(revision: u64) -> ChangeEvent {
        ChangeEvent {
            value: Some(json!({"n": revision})),
            old_value: None,
            revision,
            operations: Vec::new(),
        }
    }

    #[test]
    fn delivers_events_in_order() {
        let mut bus = ChangeBus::new(8);
        let sub = bus.subscribe();

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(sub.recv().unwrap().revision, 1);
        assert_eq!(sub.recv().unwrap().revision, 2);
    }

    #[test]
    fn lagging_subscriber_is_dropped() {
        let mut bus = ChangeBus::new(1);
        let _sub = bus.subscribe();

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn disconnected_subscriber_is_pruned() {
        let mut bus = ChangeBus::new(4);
        drop(bus.subscribe());
        bus.publish(event(1));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
