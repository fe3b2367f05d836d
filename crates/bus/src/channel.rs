//! Bounded single-producer/single-consumer channel with backpressure.
//!
//! `publish` hands the item directly to a waiting consumer when one is
//! parked; otherwise it enqueues, or parks itself when the queue is at
//! capacity. `consume` drains the queue in strict FIFO order and wakes
//! the oldest parked publisher. Both calls take a cancellation token and
//! fail with [`Error::Cancelled`] when it fires while they are parked.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use janus_domain::{Error, Result};

/// A consumer parked on an empty channel.
struct WaitingConsumer<T> {
    id: u64,
    tx: oneshot::Sender<T>,
}

/// A publisher parked on a full channel, holding its item until a
/// consumer makes room.
struct ParkedPublisher<T> {
    id: u64,
    item: T,
    ack: oneshot::Sender<()>,
}

struct Inner<T> {
    queue: VecDeque<T>,
    consumers: VecDeque<WaitingConsumer<T>>,
    publishers: VecDeque<ParkedPublisher<T>>,
    next_waiter_id: u64,
}

pub struct BoundedChannel<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                consumers: VecDeque::new(),
                publishers: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// Number of items currently enqueued (parked publishers excluded).
    pub fn depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of consumers currently parked on an empty channel.
    pub fn pending_consumers(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    /// Publish an item, suspending while the channel is at capacity.
    pub async fn publish(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (park_id, ack_rx) = {
            let mut inner = self.inner.lock();

            // Direct hand-off: a parked consumer takes the item without
            // it ever touching the queue.
            let mut item = item;
            while let Some(waiter) = inner.consumers.pop_front() {
                match waiter.tx.send(item) {
                    Ok(()) => return Ok(()),
                    // Consumer cancelled between parking and now.
                    Err(returned) => item = returned,
                }
            }

            if inner.queue.len() < self.capacity {
                inner.queue.push_back(item);
                return Ok(());
            }

            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (ack_tx, ack_rx) = oneshot::channel();
            inner.publishers.push_back(ParkedPublisher {
                id,
                item,
                ack: ack_tx,
            });
            (id, ack_rx)
        };

        let mut ack_rx = ack_rx;
        tokio::select! {
            res = &mut ack_rx => match res {
                Ok(()) => Ok(()),
                Err(_) => Err(Error::Other("channel dropped while publishing".into())),
            },
            _ = cancel.cancelled() => {
                let removed = {
                    let mut inner = self.inner.lock();
                    let before = inner.publishers.len();
                    inner.publishers.retain(|p| p.id != park_id);
                    inner.publishers.len() != before
                };
                if removed {
                    Err(Error::Cancelled)
                } else {
                    // The item was accepted concurrently with the cancel;
                    // indistinguishable from completing just before it.
                    Ok(())
                }
            }
        }
    }

    /// Consume the next item, suspending while the channel is empty.
    pub async fn consume(&self, cancel: &CancellationToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (wait_id, item_rx) = {
            let mut inner = self.inner.lock();

            if let Some(item) = inner.queue.pop_front() {
                // Promote the oldest parked publisher into the freed slot.
                if let Some(parked) = inner.publishers.pop_front() {
                    inner.queue.push_back(parked.item);
                    let _ = parked.ack.send(());
                }
                return Ok(item);
            }

            // Publishers park only while the queue is full, so an empty
            // queue normally has none; drain one directly if it happens.
            if let Some(parked) = inner.publishers.pop_front() {
                let _ = parked.ack.send(());
                return Ok(parked.item);
            }

            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            inner.consumers.push_back(WaitingConsumer { id, tx });
            (id, rx)
        };

        let mut item_rx = item_rx;
        tokio::select! {
            res = &mut item_rx => match res {
                Ok(item) => Ok(item),
                Err(_) => Err(Error::Other("channel dropped while consuming".into())),
            },
            _ = cancel.cancelled() => {
                let removed = {
                    let mut inner = self.inner.lock();
                    let before = inner.consumers.len();
                    inner.consumers.retain(|c| c.id != wait_id);
                    inner.consumers.len() != before
                };
                if removed {
                    Err(Error::Cancelled)
                } else {
                    // Hand-off raced the cancel; the delivered item wins.
                    match item_rx.try_recv() {
                        Ok(item) => Ok(item),
                        Err(_) => Err(Error::Cancelled),
                    }
                }
            }
        }
    }
}
