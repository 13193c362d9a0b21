use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use log::*;
use serde::{de::DeserializeOwned, Serialize};

/// A flat key-value store holding JSON documents.
///
/// Nothing here enforces a schema or coordinates writers: a save replaces the
/// whole value under a key, and the last writer wins.
pub trait Storage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub trait StorageExt: Storage {
    fn load<D: DeserializeOwned>(&self, key: &str) -> Result<Option<D>> {
        match self.get_raw(key)? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decode document {:?}", key))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn save<D: Serialize + ?Sized>(&self, key: &str, doc: &D) -> Result<()> {
        let bytes = serde_json::to_vec(doc).with_context(|| format!("encode {:?}", key))?;
        self.put_raw(key, &bytes)
    }

    /// Reads a document, treating absence, storage errors and malformed
    /// JSON alike as "no data".
    fn load_or_default<D: DeserializeOwned + Default>(&self, key: &str) -> D {
        match self.load(key) {
            Ok(Some(doc)) => doc,
            Ok(None) => D::default(),
            Err(e) => {
                warn!("Treating {:?} as empty: {:#}", key, e);
                D::default()
            }
        }
    }

    /// Writes a document; failures are logged and dropped. Returns whether
    /// the write landed.
    fn save_or_warn<D: Serialize + ?Sized>(&self, key: &str, doc: &D) -> bool {
        match self.save(key, doc) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropped write to {:?}: {:#}", key, e);
                false
            }
        }
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

/// Durable store backed by sled; clones share the same database.
#[derive(Clone)]
pub struct Documents {
    db: sled::Db,
}

impl Documents {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Open store at {:?}", path);
        let db = sled::open(path).with_context(|| format!("open store {:?}", path))?;
        Ok(Documents { db })
    }

    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("open temporary store")?;
        Ok(Documents { db })
    }

    /// Watches for writes to any key starting with `prefix`, including
    /// writes made through other handles on the same database.
    pub fn watch(&self, prefix: &str) -> KeyWatch {
        KeyWatch {
            subscriber: self.db.watch_prefix(prefix.as_bytes()),
        }
    }
}

impl Storage for Documents {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let val = self
            .db
            .get(key.as_bytes())
            .with_context(|| format!("read {:?}", key))?;
        Ok(val.map(|v| v.to_vec()))
    }

    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value)
            .with_context(|| format!("write {:?}", key))?;
        self.db.flush().context("flush store")?;
        trace!("Wrote {} bytes to {:?}", value.len(), key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .with_context(|| format!("remove {:?}", key))?;
        self.db.flush().context("flush store")?;
        Ok(())
    }
}

impl fmt::Debug for Documents {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Documents").finish()
    }
}

/// Storage-change signal for a [`Documents`] store.
pub struct KeyWatch {
    subscriber: sled::Subscriber,
}

impl KeyWatch {
    /// Waits up to `timeout` for the next changed key.
    pub fn next_change(&mut self, timeout: Duration) -> Option<String> {
        let event = self.subscriber.next_timeout(timeout).ok()?;
        let key = match &event {
            sled::Event::Insert { key, .. } | sled::Event::Remove { key } => key,
        };
        Some(String::from_utf8_lossy(key).into_owned())
    }

    /// Every key changed since the last call, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_change(Duration::from_millis(0)) {
            keys.push(key);
        }
        keys
    }
}

impl fmt::Debug for KeyWatch {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("KeyWatch").finish()
    }
}

/// Hands out [`Documents`] handles on one shared database through r2d2.
#[derive(Debug, Clone)]
pub struct DocumentConnectionManager {
    docs: Documents,
}

impl DocumentConnectionManager {
    pub fn new(docs: Documents) -> Self {
        DocumentConnectionManager { docs }
    }
}

impl r2d2::ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = sled::Error;

    fn connect(&self) -> Result<Documents, sled::Error> {
        Ok(self.docs.clone())
    }

    fn is_valid(&self, conn: &mut Documents) -> Result<(), sled::Error> {
        conn.db.size_on_disk().map(|_| ())
    }

    fn has_broken(&self, _conn: &mut Documents) -> bool {
        false
    }
}

/// Volatile store scoped to one session; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage::default()
    }
}

impl Storage for MemStorage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}
