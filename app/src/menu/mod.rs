use std::sync::Arc;

use anyhow::Result;
use err_derive::Error;
use log::*;

use infra::bus::Bus;
use infra::ids::{Id, IdGen};
use infra::persistence::{Storage, StorageExt};

use crate::events::Change;
use crate::keys;

mod models;

pub use self::models::{
    default_menu, Category, CustomerItem, ItemPatch, MenuItem, NewItem, UnknownCategory,
};

/// The manager's catalogue and its customer-facing mirror.
#[derive(Debug, Clone)]
pub struct Menu {
    bus: Bus<Change>,
    idgen: Arc<IdGen>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MenuError {
    #[error(display = "menu item {} not found", _0)]
    NotFound(Id<MenuItem>),
    #[error(display = "item name is required")]
    BlankName,
    #[error(display = "price must be greater than zero")]
    BadPrice,
}

impl Menu {
    pub fn new(bus: Bus<Change>, idgen: Arc<IdGen>) -> Self {
        Menu { bus, idgen }
    }

    /// Seeds both catalogues with the default menu where they are missing.
    pub fn setup(&self, docs: &dyn Storage) -> Result<()> {
        if docs.load::<Vec<CustomerItem>>(keys::MENU_ITEMS).ok().flatten().is_none() {
            info!("Seeding default menu");
            docs.save(keys::MENU_ITEMS, &default_menu())?;
        }
        if docs.get_raw(keys::MANAGER_ITEMS)?.is_none() {
            let items = self.manager_items(docs);
            debug!("Seeding manager catalogue with {} items", items.len());
            docs.save(keys::MANAGER_ITEMS, &items)?;
        }
        Ok(())
    }

    /// The mirrored menu, including inactive items. Falls back to the
    /// default menu when nothing usable is stored.
    pub fn customer_menu(&self, docs: &dyn Storage) -> Vec<CustomerItem> {
        match docs.load::<Vec<CustomerItem>>(keys::MENU_ITEMS) {
            Ok(Some(items)) => items,
            Ok(None) => default_menu(),
            Err(e) => {
                warn!("Using default menu: {:#}", e);
                default_menu()
            }
        }
    }

    /// What customers may order.
    pub fn available(&self, docs: &dyn Storage) -> Vec<CustomerItem> {
        self.customer_menu(docs)
            .into_iter()
            .filter(|i| i.active)
            .collect()
    }

    pub fn search(&self, docs: &dyn Storage, term: &str) -> Vec<CustomerItem> {
        self.available(docs)
            .into_iter()
            .filter(|i| i.matches(term))
            .collect()
    }

    /// An orderable item by exact name, ignoring case.
    pub fn find(&self, docs: &dyn Storage, name: &str) -> Option<CustomerItem> {
        let name = name.trim();
        self.available(docs)
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn manager_items(&self, docs: &dyn Storage) -> Vec<MenuItem> {
        match docs.load::<Vec<MenuItem>>(keys::MANAGER_ITEMS) {
            Ok(Some(items)) => items,
            Ok(None) => self
                .customer_menu(docs)
                .iter()
                .map(CustomerItem::to_manager)
                .collect(),
            Err(e) => {
                warn!("Rebuilding manager catalogue from menu: {:#}", e);
                self.customer_menu(docs)
                    .iter()
                    .map(CustomerItem::to_manager)
                    .collect()
            }
        }
    }

    /// One category of the manager catalogue, available items first.
    pub fn by_category(&self, docs: &dyn Storage, category: Category) -> Vec<MenuItem> {
        let mut items = self
            .manager_items(docs)
            .into_iter()
            .filter(|i| i.category == category)
            .collect::<Vec<_>>();
        items.sort_by_key(|i| !i.available);
        items
    }

    pub fn add(&self, docs: &dyn Storage, item: NewItem) -> Result<MenuItem, MenuError> {
        validate(&item.name, item.price.is_positive())?;
        let created = MenuItem::new(self.idgen.generate(), item);

        let mut items = self.manager_items(docs);
        items.push(created.clone());
        self.commit(docs, &items);
        info!("Added menu item {:?} ({})", created.name, created.id);
        Ok(created)
    }

    pub fn edit(
        &self,
        docs: &dyn Storage,
        id: Id<MenuItem>,
        patch: ItemPatch,
    ) -> Result<MenuItem, MenuError> {
        let mut items = self.manager_items(docs);
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(MenuError::NotFound(id))?;

        let mut edited = item.clone();
        edited.apply(patch);
        validate(&edited.name, edited.price.is_positive())?;
        *item = edited.clone();

        self.commit(docs, &items);
        info!("Updated menu item {:?} ({})", edited.name, id);
        Ok(edited)
    }

    pub fn remove(&self, docs: &dyn Storage, id: Id<MenuItem>) -> Result<MenuItem, MenuError> {
        let mut items = self.manager_items(docs);
        let pos = items
            .iter()
            .position(|i| i.id == id)
            .ok_or(MenuError::NotFound(id))?;
        let removed = items.remove(pos);

        self.commit(docs, &items);
        info!("Removed menu item {:?} ({})", removed.name, id);
        Ok(removed)
    }

    fn commit(&self, docs: &dyn Storage, items: &[MenuItem]) {
        let mirror = items.iter().map(MenuItem::to_customer).collect::<Vec<_>>();
        docs.save_or_warn(keys::MANAGER_ITEMS, items);
        docs.save_or_warn(keys::MENU_ITEMS, &mirror);
        self.bus.publish(Change::MenuChanged);
    }
}

fn validate(name: &str, priced: bool) -> Result<(), MenuError> {
    if name.trim().is_empty() {
        return Err(MenuError::BlankName);
    }
    if !priced {
        return Err(MenuError::BadPrice);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::money::Money;
    use infra::persistence::MemStorage;

    fn menu() -> (Menu, Bus<Change>, MemStorage) {
        env_logger::try_init().unwrap_or_default();
        let bus = Bus::new();
        let menu = Menu::new(bus.clone(), Arc::new(IdGen::new()));
        let docs = MemStorage::new();
        menu.setup(&docs).expect("setup");
        (menu, bus, docs)
    }

    fn fries() -> NewItem {
        NewItem {
            name: "Fries".into(),
            description: Some("Crispy".into()),
            price: Money::from_cents(3000),
            category: Category::Meals,
            available: true,
        }
    }

    #[test]
    fn setup_seeds_both_catalogues() {
        let (menu, _, docs) = menu();
        assert_eq!(menu.customer_menu(&docs), default_menu());
        assert_eq!(menu.manager_items(&docs).len(), 4);
        assert!(docs.get_raw(keys::MANAGER_ITEMS).expect("get").is_some());
    }

    #[test]
    fn malformed_menu_falls_back_to_defaults() {
        let docs = MemStorage::new();
        docs.put_raw(keys::MENU_ITEMS, b"nope").expect("put");
        let menu = Menu::new(Bus::new(), Arc::new(IdGen::new()));
        assert_eq!(menu.customer_menu(&docs), default_menu());
        menu.setup(&docs).expect("setup");
        assert_eq!(
            docs.load::<Vec<CustomerItem>>(keys::MENU_ITEMS).expect("load"),
            Some(default_menu())
        );
    }

    #[test]
    fn adding_mirrors_and_announces() {
        let (menu, bus, docs) = menu();
        let sub = bus.subscribe();

        let added = menu.add(&docs, fries()).expect("add");

        assert_eq!(menu.customer_menu(&docs).len(), 5);
        assert_eq!(menu.find(&docs, "fries").map(|i| i.id), Some(added.id));
        assert_eq!(sub.drain(), vec![Change::MenuChanged]);
    }

    #[test]
    fn first_manager_save_keeps_the_defaults() {
        let docs = MemStorage::new();
        let menu = Menu::new(Bus::new(), Arc::new(IdGen::new()));
        menu.add(&docs, fries()).expect("add");
        assert_eq!(menu.available(&docs).len(), 5);
    }

    #[test]
    fn hidden_items_stay_listed_but_unorderable() {
        let (menu, _, docs) = menu();
        let fanta = Id::from_raw(4);
        menu.edit(
            &docs,
            fanta,
            ItemPatch {
                available: Some(false),
                ..ItemPatch::default()
            },
        )
        .expect("edit");

        assert_eq!(menu.available(&docs).len(), 3);
        assert!(menu.find(&docs, "Fanta").is_none());
        let drinks = menu.by_category(&docs, Category::Drinks);
        assert_eq!(
            drinks.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["Coca-Cola", "Fanta"]
        );
        assert!(!drinks[1].available);
    }

    #[test]
    fn rejects_invalid_items() {
        let (menu, _, docs) = menu();
        let mut item = fries();
        item.name = "  ".into();
        assert_eq!(menu.add(&docs, item), Err(MenuError::BlankName));
        let mut item = fries();
        item.price = Money::ZERO;
        assert_eq!(menu.add(&docs, item), Err(MenuError::BadPrice));
        assert_eq!(
            menu.edit(
                &docs,
                Id::from_raw(1),
                ItemPatch {
                    price: Some(Money::from_cents(-5)),
                    ..ItemPatch::default()
                }
            ),
            Err(MenuError::BadPrice)
        );
        assert_eq!(menu.manager_items(&docs)[0].price, Money::from_cents(12999));
    }

    #[test]
    fn removing_unknown_item_fails() {
        let (menu, _, docs) = menu();
        let removed = menu.remove(&docs, Id::from_raw(3)).expect("remove");
        assert_eq!(removed.name, "Coca-Cola");
        assert_eq!(
            menu.remove(&docs, Id::from_raw(3)),
            Err(MenuError::NotFound(Id::from_raw(3)))
        );
    }
}
