use std::fmt;
use std::str::FromStr;

use err_derive::Error;
use serde::{Deserialize, Serialize};

use infra::ids::{Entity, Id};

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Meals,
    Drinks,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(display = "unknown category: {:?}", _0)]
pub struct UnknownCategory(pub String);

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Meals => "meals",
            Category::Drinks => "drinks",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Meals
    }
}

impl fmt::Display for Category {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "meals" | "meal" => Ok(Category::Meals),
            "drinks" | "drink" => Ok(Category::Drinks),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// An entry in the manager's catalogue (`managerItems`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Id<MenuItem>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Money,
    #[serde(default)]
    pub category: Category,
    #[serde(default = "available_by_default")]
    pub available: bool,
}

/// The customer-facing mirror of a [`MenuItem`] (`menuItems`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerItem {
    pub id: Id<MenuItem>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default)]
    pub category: Category,
    #[serde(default = "available_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub category: Category,
    pub available: bool,
}

/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub category: Option<Category>,
    pub available: Option<bool>,
}

fn available_by_default() -> bool {
    true
}

impl MenuItem {
    pub(super) fn new(id: Id<MenuItem>, item: NewItem) -> Self {
        let mut created = MenuItem {
            id,
            name: item.name.trim().to_string(),
            description: item.description,
            price: item.price,
            category: item.category,
            available: item.available,
        };
        created.tidy();
        created
    }

    pub(super) fn apply(&mut self, patch: ItemPatch) {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(available) = patch.available {
            self.available = available;
        }
        self.tidy();
    }

    /// Drinks carry no description; blank descriptions are dropped.
    fn tidy(&mut self) {
        if self.category == Category::Drinks {
            self.description = None;
        }
        if let Some(desc) = self.description.as_ref() {
            if desc.trim().is_empty() {
                self.description = None;
            }
        }
    }

    pub fn to_customer(&self) -> CustomerItem {
        CustomerItem {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            price: self.price,
            category: self.category,
            active: self.available,
        }
    }
}

impl CustomerItem {
    pub fn to_manager(&self) -> MenuItem {
        MenuItem {
            id: self.id,
            name: self.name.clone(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            price: self.price,
            category: self.category,
            available: self.active,
        }
    }

    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        self.name.to_lowercase().contains(&term) || self.description.to_lowercase().contains(&term)
    }
}

impl Entity for MenuItem {
    const PREFIX: &'static str = "item";
}

/// The menu a fresh store starts with.
pub fn default_menu() -> Vec<CustomerItem> {
    let item = |id, name: &str, description: &str, cents, category| CustomerItem {
        id: Id::from_raw(id),
        name: name.to_string(),
        description: description.to_string(),
        price: Money::from_cents(cents),
        category,
        active: true,
    };
    vec![
        item(
            1,
            "Chicken Burger",
            "Juicy chicken patty with fresh lettuce and special sauce",
            12999,
            Category::Meals,
        ),
        item(
            2,
            "Beef Burger",
            "Classic beef patty with cheese and vegetables",
            13999,
            Category::Meals,
        ),
        item(3, "Coca-Cola", "Refreshing cold drink", 2500, Category::Drinks),
        item(4, "Fanta", "Orange flavored soda", 2500, Category::Drinks),
    ]
}
