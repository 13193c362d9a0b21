use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use log::*;

use infra::bus::{Debouncer, Subscription};
use infra::clock::Clock;
use infra::persistence::Storage;

use crate::accounts::Role;
use crate::events::Change;
use crate::menu::{CustomerItem, Menu};
use crate::messages::{ContactMessage, Messages};
use crate::orders::OrderStore;

/// One role context's copy of the shared collections.
///
/// Changes announced on the bus are gathered into a debounce window; when
/// it closes, only the collections named by the gathered changes are read
/// again. Nothing happens between calls to [`Replica::pump`].
pub struct Replica {
    role: Role,
    orders: OrderStore,
    menu_service: Menu,
    messages_service: Messages,
    menu: Vec<CustomerItem>,
    messages: Vec<ContactMessage>,
    changes: Subscription<Change>,
    debounce: Debouncer<Change>,
    clock: Arc<dyn Clock>,
}

impl Replica {
    pub fn new(
        role: Role,
        orders: OrderStore,
        menu_service: Menu,
        messages_service: Messages,
        changes: Subscription<Change>,
        clock: Arc<dyn Clock>,
        window: Duration,
    ) -> Self {
        Replica {
            role,
            orders,
            menu_service,
            messages_service,
            menu: Vec::new(),
            messages: Vec::new(),
            changes,
            debounce: Debouncer::new(window),
            clock,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn orders(&self) -> &OrderStore {
        &self.orders
    }

    /// For status changes made from this context.
    pub fn orders_mut(&mut self) -> &mut OrderStore {
        &mut self.orders
    }

    pub fn menu(&self) -> &[CustomerItem] {
        &self.menu
    }

    pub fn messages(&self) -> &[ContactMessage] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    pub fn reload_all(&mut self, docs: &dyn Storage) {
        for change in [
            Change::OrdersChanged,
            Change::MenuChanged,
            Change::MessagesChanged,
        ]
        .iter()
        {
            self.reload(docs, *change);
        }
    }

    /// Takes in any announced changes and, once the window has closed,
    /// re-reads what they name. Returns the changes acted on, if any.
    pub fn pump(&mut self, docs: &dyn Storage) -> Option<HashSet<Change>> {
        let now = self.clock.now();
        for change in self.changes.drain() {
            trace!("{} replica saw {:?}", self.role, change);
            self.debounce.schedule(change, now);
        }

        let fired = self.debounce.poll(now)?;
        debug!("{} replica reloading for {:?}", self.role, fired);
        for change in fired.iter() {
            self.reload(docs, *change);
        }
        Some(fired)
    }

    fn reload(&mut self, docs: &dyn Storage, change: Change) {
        match change {
            Change::OrdersChanged => self.orders.load(docs),
            Change::MenuChanged => self.menu = self.menu_service.customer_menu(docs),
            Change::MessagesChanged => self.messages = self.messages_service.inbox(docs),
        }
    }
}

impl fmt::Debug for Replica {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Replica")
            .field("role", &self.role)
            .field("orders", &self.orders)
            .field("menu", &self.menu.len())
            .field("messages", &self.messages.len())
            .field("pending", &self.debounce.is_pending())
            .finish()
    }
}
