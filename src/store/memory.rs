use super::{Deliveries, Delivery, Error, Result, Store};
use crate::domain::Endpoint;
use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time;

/// An in-process store with the same delivery rules as the real one.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    slots: Arc<Mutex<HashMap<(String, String), Slot>>>,
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    writes: usize,
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
}

impl Memory {
    pub fn value(&self, endpoint: &str, key: &str) -> Option<Value> {
        let slots = self.slots.lock();
        slots.get(&slot_key(endpoint, key))?.value.clone()
    }

    pub fn writes(&self, endpoint: &str, key: &str) -> usize {
        let slots = self.slots.lock();
        slots.get(&slot_key(endpoint, key)).map_or(0, |s| s.writes)
    }

    /// Subscribers whose stream is still alive.
    pub fn subscribers(&self, endpoint: &str, key: &str) -> usize {
        let slots = self.slots.lock();
        slots.get(&slot_key(endpoint, key)).map_or(0, |s| {
            s.subscribers.iter().filter(|tx| !tx.is_closed()).count()
        })
    }

    pub fn total_subscribers(&self) -> usize {
        let slots = self.slots.lock();
        slots
            .values()
            .flat_map(|s| &s.subscribers)
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Sessions open and close on their own tasks.
    pub async fn wait_for_subscribers(&self, n: usize) {
        for _ in 0..200 {
            if self.total_subscribers() == n {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "Expected {} subscribers, found {}",
            n,
            self.total_subscribers()
        );
    }

    /// Ends every live subscription to `key` the way a revoked rule would.
    pub fn cancel(&self, endpoint: &str, key: &str, reason: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&slot_key(endpoint, key)) {
            for tx in slot.subscribers.drain(..) {
                let _ = tx.unbounded_send(Err(Error::SubscriptionCancelled {
                    reason: reason.to_owned(),
                }));
            }
        }
    }
}

fn slot_key(endpoint: &str, key: &str) -> (String, String) {
    let endpoint = Endpoint::parse(endpoint).map_or_else(|_| endpoint.to_owned(), |e| e.to_string());
    (endpoint, key.to_owned())
}

#[async_trait]
impl Store for Memory {
    async fn overwrite(&self, endpoint: &Endpoint, key: &str, value: Value) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(slot_key(&endpoint.to_string(), key)).or_default();

        slot.value = Some(value).filter(|v| !v.is_null());
        slot.writes += 1;

        let value = &slot.value;
        slot.subscribers
            .retain(|tx| tx.unbounded_send(Ok(value.clone())).is_ok());

        Ok(())
    }

    async fn subscribe(&self, endpoint: &Endpoint, key: &str) -> Result<Deliveries> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(slot_key(&endpoint.to_string(), key)).or_default();

        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(Ok(slot.value.clone()));
        slot.subscribers.push(tx);

        Ok(rx.boxed())
    }
}
