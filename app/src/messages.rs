use std::sync::Arc;

use chrono::{DateTime, Utc};
use err_derive::Error;
use log::*;
use serde::{Deserialize, Serialize};

use infra::bus::Bus;
use infra::clock::Clock;
use infra::ids::{Entity, Id, IdGen};
use infra::persistence::{Storage, StorageExt};

use crate::events::Change;
use crate::keys;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: Id<ContactMessage>,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
}

impl Entity for ContactMessage {
    const PREFIX: &'static str = "msg";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error(display = "please fill in all fields")]
    MissingField,
    #[error(display = "message {} not found", _0)]
    NotFound(Id<ContactMessage>),
}

/// Customer enquiries, read by the manager.
#[derive(Debug, Clone)]
pub struct Messages {
    bus: Bus<Change>,
    clock: Arc<dyn Clock>,
    idgen: Arc<IdGen>,
}

impl Messages {
    pub fn new(bus: Bus<Change>, clock: Arc<dyn Clock>, idgen: Arc<IdGen>) -> Self {
        Messages { bus, clock, idgen }
    }

    pub fn send(
        &self,
        docs: &dyn Storage,
        name: &str,
        email: &str,
        message: &str,
    ) -> Result<ContactMessage, MessageError> {
        let (name, email, message) = (name.trim(), email.trim(), message.trim());
        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err(MessageError::MissingField);
        }

        let now = self.clock.now();
        let sent = ContactMessage {
            id: self.idgen.generate_at(now),
            timestamp: now,
            name: name.to_string(),
            email: email.to_string(),
            message: message.to_string(),
            read: false,
        };

        let mut all = self.all(docs);
        all.insert(0, sent.clone());
        docs.save_or_warn(keys::CONTACT_MESSAGES, &all);
        info!("Message {} from {}", sent.id, sent.email);
        self.bus.publish(Change::MessagesChanged);
        Ok(sent)
    }

    /// Stored order, newest first.
    pub fn all(&self, docs: &dyn Storage) -> Vec<ContactMessage> {
        docs.load_or_default(keys::CONTACT_MESSAGES)
    }

    /// Unread first, then newest first.
    pub fn inbox(&self, docs: &dyn Storage) -> Vec<ContactMessage> {
        let mut all = self.all(docs);
        all.sort_by(|a, b| a.read.cmp(&b.read).then(b.timestamp.cmp(&a.timestamp)));
        all
    }

    pub fn unread_count(&self, docs: &dyn Storage) -> usize {
        self.all(docs).iter().filter(|m| !m.read).count()
    }

    pub fn mark_read(
        &self,
        docs: &dyn Storage,
        id: Id<ContactMessage>,
    ) -> Result<ContactMessage, MessageError> {
        let mut all = self.all(docs);
        let msg = all
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MessageError::NotFound(id))?;
        msg.read = true;
        let marked = msg.clone();

        docs.save_or_warn(keys::CONTACT_MESSAGES, &all);
        debug!("Marked message {} read", id);
        self.bus.publish(Change::MessagesChanged);
        Ok(marked)
    }
}
