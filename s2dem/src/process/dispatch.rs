//! Bounded hand-off between the decoder and record consumers.
//!
//! The decoder pushes [`Item`]s into a bounded channel; a dispatcher thread
//! owns the consumers and calls them in queue order. A full queue blocks the
//! decoder. A capacity of zero makes every push wait until the consumers
//! have handled the item.
//!
//! Cancelling through a [`CancelToken`] wakes a blocked push, and every item
//! still queued afterwards is discarded without reaching a consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, error};

use crate::process::decode::Record;
use crate::utils::errors::FormatError;

/// Smallest capacity the heuristic picks.
pub const MIN_QUEUE_CAPACITY: usize = 1024;

/// Largest capacity the heuristic picks.
pub const MAX_QUEUE_CAPACITY: usize = 65536;

/// Queue capacity for a recording expected to hold `expected_records`
/// records.
pub fn queue_capacity_for(expected_records: usize) -> usize {
    expected_records.clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY)
}

#[derive(Debug, Clone)]
pub enum Item {
    /// Tick of the outer record that follows.
    Tick(u32),
    Record(Record),
    /// Every item of one outer record has been queued.
    FrameBoundary,
}

pub type Consumer = Box<dyn FnMut(&Item) -> Result<()> + Send>;

enum Envelope {
    Item(Item),
    Sync(Sender<()>),
}

struct CancelState {
    cancelled: AtomicBool,
    signal: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
}

/// Cooperative cancellation shared between the decoder and its callers.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (signal, wake) = channel::bounded(0);
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                signal: Mutex::new(Some(signal)),
                wake,
            }),
        }
    }
}

impl CancelToken {
    /// Requests cancellation. Further calls have no effect.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects `wake` for every waiter.
        self.state
            .signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    fn wake(&self) -> &Receiver<()> {
        &self.state.wake
    }
}

pub struct DispatchQueue {
    sender: Option<Sender<Envelope>>,
    pending: Receiver<Envelope>,
    worker: Option<JoinHandle<()>>,
    capacity: usize,
    cancel: CancelToken,
}

impl DispatchQueue {
    /// Starts the dispatcher thread with its consumers.
    pub fn start(capacity: usize, consumers: Vec<Consumer>, cancel: CancelToken) -> Result<Self> {
        let (sender, receiver) = channel::bounded(capacity);
        let pending = receiver.clone();
        let token = cancel.clone();

        let worker = thread::Builder::new()
            .name("s2dem-dispatch".into())
            .spawn(move || dispatch_loop(receiver, consumers, token))?;

        debug!("Dispatch queue started with capacity {capacity}");

        Ok(Self {
            sender: Some(sender),
            pending,
            worker: Some(worker),
            capacity,
            cancel,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items waiting for the dispatcher.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queues an item, blocking while the queue is full.
    ///
    /// Returns `false` when the queue was cancelled before the item got in.
    pub fn push(&self, item: Item) -> Result<bool, FormatError> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        if !self.send(Envelope::Item(item))? {
            return Ok(false);
        }

        if self.capacity == 0 {
            return self.sync();
        }

        Ok(true)
    }

    /// Blocks until the consumers have handled everything queued so far.
    ///
    /// Returns `false` when cancelled while waiting.
    pub fn sync(&self) -> Result<bool, FormatError> {
        let (ack, done) = channel::bounded(1);
        if !self.send(Envelope::Sync(ack))? {
            return Ok(false);
        }

        select! {
            recv(done) -> res => Ok(res.is_ok()),
            recv(self.cancel.wake()) -> _ => Ok(false),
        }
    }

    /// Discards every queued item without dispatching it.
    pub fn drain(&self) -> usize {
        let mut discarded = 0;
        while let Ok(envelope) = self.pending.try_recv() {
            if let Envelope::Item(_) = envelope {
                discarded += 1;
            }
        }

        if discarded > 0 {
            debug!("Drained {discarded} queued items");
        }

        discarded
    }

    /// Stops accepting items and waits for the dispatcher to finish the
    /// queue.
    pub fn close(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Dispatcher thread panicked");
            }
        }
    }

    fn send(&self, envelope: Envelope) -> Result<bool, FormatError> {
        let sender = self.sender.as_ref().ok_or(FormatError::QueueClosed)?;

        select! {
            send(sender, envelope) -> res => res.map(|_| true).map_err(|_| FormatError::QueueClosed),
            recv(self.cancel.wake()) -> _ => Ok(false),
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_loop(receiver: Receiver<Envelope>, mut consumers: Vec<Consumer>, cancel: CancelToken) {
    for envelope in receiver.iter() {
        match envelope {
            Envelope::Item(item) => {
                if cancel.is_cancelled() {
                    continue;
                }
                for consumer in consumers.iter_mut() {
                    if let Err(err) = consumer(&item) {
                        error!("Consumer failed on {item:?}: {err:#}");
                    }
                }
            }
            Envelope::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// A consumer forwarding every item into an unbounded channel.
pub fn subscriber() -> (Consumer, Receiver<Item>) {
    let (sender, receiver) = channel::unbounded();
    let consumer: Consumer = Box::new(move |item: &Item| {
        // A dropped receiver just stops listening.
        let _ = sender.send(item.clone());
        Ok(())
    });
    (consumer, receiver)
}

#[cfg(test)]
use std::sync::atomic::AtomicUsize;
#[cfg(test)]
use std::time::Duration;

#[test]
fn capacity_heuristic_is_clamped() {
    assert_eq!(queue_capacity_for(0), MIN_QUEUE_CAPACITY);
    assert_eq!(queue_capacity_for(5000), 5000);
    assert_eq!(queue_capacity_for(10_000_000), MAX_QUEUE_CAPACITY);
}

#[test]
fn items_reach_consumers_in_order() -> anyhow::Result<()> {
    let (consumer, items) = subscriber();
    let queue = DispatchQueue::start(4, vec![consumer], CancelToken::default())?;

    for tick in 0..10 {
        assert!(queue.push(Item::Tick(tick))?);
    }
    assert!(queue.push(Item::FrameBoundary)?);
    assert!(queue.sync()?);

    let received: Vec<_> = items.try_iter().collect();
    assert_eq!(received.len(), 11);
    assert!(matches!(received[3], Item::Tick(3)));
    assert!(matches!(received[10], Item::FrameBoundary));
    Ok(())
}

#[test]
fn failing_consumer_does_not_stop_others() -> anyhow::Result<()> {
    let failing: Consumer = Box::new(|_| anyhow::bail!("consumer broke"));
    let (consumer, items) = subscriber();
    let mut queue = DispatchQueue::start(2, vec![failing, consumer], CancelToken::default())?;

    queue.push(Item::Tick(1))?;
    queue.push(Item::Tick(2))?;
    queue.close();

    assert_eq!(items.try_iter().count(), 2);
    assert!(matches!(queue.push(Item::Tick(3)), Err(FormatError::QueueClosed)));
    Ok(())
}

#[test]
fn zero_capacity_is_lock_step() -> anyhow::Result<()> {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let slow: Consumer = Box::new(move |_| {
        thread::sleep(Duration::from_millis(5));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let queue = DispatchQueue::start(0, vec![slow], CancelToken::default())?;

    for i in 1..=3 {
        queue.push(Item::Tick(i))?;
        assert_eq!(handled.load(Ordering::SeqCst), i as usize);
    }
    Ok(())
}

#[test]
fn cancel_wakes_a_blocked_push_and_drains() -> anyhow::Result<()> {
    let (gate_tx, gate_rx) = channel::bounded::<()>(0);
    let (consumer, items) = subscriber();
    let blocking: Consumer = Box::new(move |_| {
        let _ = gate_rx.recv();
        Ok(())
    });

    let cancel = CancelToken::default();
    let queue = DispatchQueue::start(1, vec![blocking, consumer], cancel.clone())?;

    // The dispatcher holds item 0 at the gate, item 1 fills the queue.
    assert!(queue.push(Item::Tick(0))?);
    assert!(queue.push(Item::Tick(1))?);

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
            cancel.cancel();
        })
    };

    assert!(!queue.push(Item::Tick(2))?);
    canceller.join().map_err(|_| anyhow::anyhow!("canceller panicked"))?;
    assert!(cancel.is_cancelled());

    queue.drain();
    drop(gate_tx);
    drop(queue);

    let received: Vec<_> = items.try_iter().collect();
    assert!(matches!(received.as_slice(), [Item::Tick(0)]));
    Ok(())
}
