//! In-process change notification.
//!
//! A [`Bus`] fans each published message out to every live [`Subscription`].
//! Messages only say *that* something changed; receivers are expected to go
//! back to the store and re-read. Delivery is best-effort: subscriptions that
//! have been dropped are pruned on the next publish, and nothing crosses a
//! process boundary.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::*;

pub struct Bus<M> {
    subscribers: Arc<Mutex<Vec<Sender<M>>>>,
}

pub struct Subscription<M> {
    rx: Receiver<M>,
}

impl<M: Clone + fmt::Debug> Bus<M> {
    pub fn new() -> Self {
        Bus {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Subscription { rx }
    }

    /// Returns the number of subscribers the message reached.
    pub fn publish(&self, msg: M) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
        debug!("Published {:?} to {} subscribers", msg, subscribers.len());
        subscribers.len()
    }
}

impl<M: Clone + fmt::Debug> Default for Bus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Bus<M> {
    fn clone(&self) -> Self {
        Bus {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<M> fmt::Debug for Bus<M> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let n = self
            .subscribers
            .lock()
            .map(|s| s.len())
            .unwrap_or_default();
        fmt.debug_struct("Bus").field("subscribers", &n).finish()
    }
}

impl<M> Subscription<M> {
    /// Everything delivered since the last drain, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.rx.try_iter().collect()
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Subscription").finish()
    }
}

/// Coalesces a burst of messages into one firing.
///
/// Each [`Debouncer::schedule`] pushes the deadline out to `now + window`,
/// replacing any earlier deadline. [`Debouncer::poll`] yields the distinct
/// messages collected so far once the deadline has passed.
#[derive(Debug)]
pub struct Debouncer<M: Eq + Hash> {
    window: Duration,
    deadline: Option<DateTime<Utc>>,
    pending: HashSet<M>,
}

impl<M: Eq + Hash> Debouncer<M> {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            deadline: None,
            pending: HashSet::new(),
        }
    }

    pub fn schedule(&mut self, msg: M, now: DateTime<Utc>) {
        self.pending.insert(msg);
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<HashSet<M>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(mem::take(&mut self.pending))
            }
            _ => None,
        }
    }
}
