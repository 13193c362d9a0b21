use std::sync::Arc;

use anyhow::{Context, Result};
use log::*;
use r2d2::{Pool, PooledConnection};

use infra::bus::Bus;
use infra::clock::{Clock, SystemClock};
use infra::ids::IdGen;
use infra::persistence::{DocumentConnectionManager, MemStorage};

pub mod accounts;
pub mod cart;
pub mod config;
pub mod events;
pub mod menu;
pub mod messages;
pub mod money;
pub mod orders;
pub mod replica;
pub mod statement;
pub mod stats;

use crate::accounts::{Accounts, Role};
use crate::cart::{Checkout, PaymentGateway};
use crate::events::{Change, StorageSignal};
use crate::menu::Menu;
use crate::messages::Messages;
use crate::orders::OrderStore;
use crate::replica::Replica;
use crate::stats::Stats;

/// Names of the documents held in the shared store.
pub mod keys {
    pub const ORDERS: &str = "orders";
    pub const MENU_ITEMS: &str = "menuItems";
    pub const MANAGER_ITEMS: &str = "managerItems";
    pub const CONTACT_MESSAGES: &str = "contactMessages";
    pub const USERS: &str = "users";
    pub const CURRENT_USER: &str = "currentUser";
    pub const ADMIN_DATA: &str = "adminData";
    pub const MANAGER_DATA: &str = "managerData";
    pub const CART: &str = "cart";
    pub const DAILY_STATS: &str = "dailyStats";
    pub const MONTHLY_STATS: &str = "monthlyStats";
    pub const YEARLY_STATS: &str = "yearlyStats";

    /// Session-scoped flags, kept out of the shared store.
    pub const IS_ADMIN: &str = "isAdmin";
    pub const IS_MANAGER: &str = "isManager";
}

pub type Docs = PooledConnection<DocumentConnectionManager>;

/// Wires the shared store, the change bus and the clock into the services
/// each role context works with.
#[derive(Debug, Clone)]
pub struct Canteen {
    db: Pool<DocumentConnectionManager>,
    bus: Bus<Change>,
    clock: Arc<dyn Clock>,
    idgen: Arc<IdGen>,
    settings: config::Settings,
}

impl Canteen {
    pub fn new(config: &config::Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &config::Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = config.db.build()?;
        let settings = config.settings();
        debug!("Settings: {:?}", settings);

        Ok(Canteen {
            db,
            bus: Bus::new(),
            clock,
            idgen: Arc::new(IdGen::new()),
            settings,
        })
    }

    pub fn docs(&self) -> Result<Docs> {
        self.db.get().context("checkout store handle")
    }

    /// Seeds the menu and the staff accounts where they are missing.
    pub fn setup(&self) -> Result<()> {
        info!("Setting up store");
        let docs = self.docs()?;
        self.menu().setup(&*docs)?;
        self.accounts(MemStorage::new()).setup(&*docs)?;
        Ok(())
    }

    pub fn bus(&self) -> &Bus<Change> {
        &self.bus
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn settings(&self) -> &config::Settings {
        &self.settings
    }

    /// An order store loaded from the shared store.
    pub fn orders(&self) -> Result<OrderStore> {
        let docs = self.docs()?;
        let mut orders = self.empty_orders();
        orders.load(&*docs);
        Ok(orders)
    }

    fn empty_orders(&self) -> OrderStore {
        OrderStore::new(
            self.bus.clone(),
            self.clock.clone(),
            self.idgen.clone(),
            self.settings.order_cache_limit,
        )
    }

    pub fn stats(&self) -> Stats {
        Stats::new(self.clock.clone(), self.settings.stats_ttl)
    }

    pub fn menu(&self) -> Menu {
        Menu::new(self.bus.clone(), self.idgen.clone())
    }

    pub fn messages(&self) -> Messages {
        Messages::new(self.bus.clone(), self.clock.clone(), self.idgen.clone())
    }

    /// Account operations bound to one browsing session.
    pub fn accounts(&self, session: MemStorage) -> Accounts {
        Accounts::new(session)
    }

    pub fn checkout(&self, gateway: Box<dyn PaymentGateway>) -> Checkout {
        Checkout::new(self.clock.clone(), self.settings.hours.clone(), gateway)
    }

    /// A role context's view of the store, subscribed to changes from now on.
    pub fn replica(&self, role: Role) -> Result<Replica> {
        let docs = self.docs()?;
        let mut replica = Replica::new(
            role,
            self.empty_orders(),
            self.menu(),
            self.messages(),
            self.bus.subscribe(),
            self.clock.clone(),
            self.settings.debounce,
        );
        replica.reload_all(&*docs);
        Ok(replica)
    }

    /// Relays writes to the on-disk store onto this instance's bus.
    pub fn storage_signal(&self) -> Result<StorageSignal> {
        let docs = self.docs()?;
        Ok(StorageSignal::new(docs.watch(""), self.bus.clone()))
    }
}
