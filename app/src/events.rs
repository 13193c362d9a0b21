use std::time::Duration;

use log::*;
use serde::{Deserialize, Serialize};

use infra::bus::Bus;
use infra::persistence::KeyWatch;

use crate::keys;

/// "Something changed; go and re-read it." Carries no diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Change {
    OrdersChanged,
    MenuChanged,
    MessagesChanged,
}

impl Change {
    /// The change a write to `key` implies, if anyone listens for it.
    pub fn for_key(key: &str) -> Option<Change> {
        match key {
            keys::ORDERS => Some(Change::OrdersChanged),
            keys::MENU_ITEMS | keys::MANAGER_ITEMS => Some(Change::MenuChanged),
            keys::CONTACT_MESSAGES => Some(Change::MessagesChanged),
            _ => None,
        }
    }
}

/// Relays storage-change signals from the shared on-disk store onto a local
/// bus, so writes made by another process surface as ordinary [`Change`]s.
#[derive(Debug)]
pub struct StorageSignal {
    watch: KeyWatch,
    bus: Bus<Change>,
}

impl StorageSignal {
    pub fn new(watch: KeyWatch, bus: Bus<Change>) -> Self {
        StorageSignal { watch, bus }
    }

    /// Publishes a change for every relevant key written since the last
    /// pump. Returns how many were relayed.
    pub fn pump(&mut self) -> usize {
        let keys = self.watch.drain();
        self.relay(keys)
    }

    /// Like [`StorageSignal::pump`], but waits up to `timeout` for the
    /// first write.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let mut keys = Vec::new();
        if let Some(first) = self.watch.next_change(timeout) {
            keys.push(first);
            keys.extend(self.watch.drain());
        }
        self.relay(keys)
    }

    fn relay(&self, keys: Vec<String>) -> usize {
        let mut relayed = 0;
        for key in keys {
            match Change::for_key(&key) {
                Some(change) => {
                    trace!("Storage signal {:?} -> {:?}", key, change);
                    self.bus.publish(change);
                    relayed += 1;
                }
                None => trace!("Ignoring write to {:?}", key),
            }
        }
        relayed
    }
}
