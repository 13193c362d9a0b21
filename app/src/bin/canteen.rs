use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::*;
use serde::Deserialize;
use structopt::StructOpt;

use canteen::accounts::{Registration, Role};
use canteen::cart::{Cart, OfflineGateway};
use canteen::menu::{Category, ItemPatch, MenuItem, NewItem};
use canteen::money::Money;
use canteen::orders::{Order, OrderStatus};
use canteen::statement::Statement;
use canteen::stats::Scope;
use infra::ids::Id;
use infra::persistence::MemStorage;

#[derive(Debug, StructOpt)]
#[structopt(name = "canteen", about = "Canteen ordering CLI")]
struct Opt {
    /// Config file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Seed the menu and staff accounts")]
    Setup,
    #[structopt(name = "menu", about = "Show the menu")]
    Menu {
        #[structopt(short = "c", long = "category")]
        category: Option<Category>,
        #[structopt(short = "s", long = "search")]
        search: Option<String>,
    },
    #[structopt(name = "add-item", about = "Add a menu item")]
    AddItem {
        #[structopt(long = "name")]
        name: String,
        #[structopt(long = "price")]
        price: Money,
        #[structopt(long = "category", default_value = "meals")]
        category: Category,
        #[structopt(long = "description")]
        description: Option<String>,
        #[structopt(long = "hidden")]
        hidden: bool,
    },
    #[structopt(name = "toggle-item", about = "Show or hide a menu item")]
    ToggleItem { id: Id<MenuItem> },
    #[structopt(name = "remove-item", about = "Remove a menu item")]
    RemoveItem { id: Id<MenuItem> },
    #[structopt(name = "register", about = "Register a customer")]
    Register {
        #[structopt(long = "name")]
        name: String,
        #[structopt(long = "email")]
        email: String,
        #[structopt(long = "phone", default_value = "")]
        phone: String,
        #[structopt(long = "password")]
        password: String,
    },
    #[structopt(name = "order", about = "Sign in, fill a cart and check out")]
    Order {
        #[structopt(long = "email")]
        email: String,
        #[structopt(long = "password")]
        password: String,
        /// Item names; repeat a name to order more than one
        items: Vec<String>,
    },
    #[structopt(name = "orders", about = "List orders")]
    Orders {
        #[structopt(long = "status")]
        status: Option<OrderStatus>,
        #[structopt(long = "search")]
        search: Option<String>,
    },
    #[structopt(name = "advance", about = "Change an order's status")]
    Advance { id: Id<Order>, status: OrderStatus },
    #[structopt(name = "complete", about = "Complete an order with its PIN")]
    Complete { id: Id<Order>, pin: String },
    #[structopt(name = "stats", about = "Show dashboard figures")]
    Stats,
    #[structopt(name = "statement", about = "Print this year's statement")]
    Statement,
    #[structopt(name = "send-message", about = "Send a contact message")]
    SendMessage {
        #[structopt(long = "name")]
        name: String,
        #[structopt(long = "email")]
        email: String,
        #[structopt(long = "message")]
        message: String,
    },
    #[structopt(name = "inbox", about = "List contact messages")]
    Inbox,
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    canteen: canteen::config::Config,
    #[serde(default)]
    env_logger: canteen::config::EnvLogger,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)
        .with_context(|| format!("open config {:?}", opt.config))?
        .read_to_string(&mut config_buf)?;
    let config: Config = toml::from_str(&config_buf).context("parse config")?;

    config.env_logger.builder().init();

    let canteen = canteen::Canteen::new(&config.canteen.with_env()?)?;
    let docs = canteen.docs()?;

    debug!("Running {:?}", opt.command);
    match opt.command {
        Commands::Setup => canteen.setup()?,
        Commands::Menu { category, search } => {
            let menu = canteen.menu();
            match (category, search) {
                (Some(category), _) => {
                    for item in menu.by_category(&*docs, category) {
                        let shown = if item.available { "" } else { " (hidden)" };
                        println!("{}: {} {}{}", item.id, item.name, item.price.currency(), shown);
                    }
                }
                (None, Some(term)) => {
                    for item in menu.search(&*docs, &term) {
                        println!("{}: {} {}", item.id, item.name, item.price.currency());
                    }
                }
                (None, None) => {
                    for item in menu.available(&*docs) {
                        println!(
                            "{}: {} [{}] {} {}",
                            item.id,
                            item.name,
                            item.category,
                            item.price.currency(),
                            item.description
                        );
                    }
                }
            }
        }
        Commands::AddItem {
            name,
            price,
            category,
            description,
            hidden,
        } => {
            let item = canteen.menu().add(
                &*docs,
                NewItem {
                    name,
                    description,
                    price,
                    category,
                    available: !hidden,
                },
            )?;
            println!("{}", item.id);
        }
        Commands::ToggleItem { id } => {
            let menu = canteen.menu();
            let available = menu
                .manager_items(&*docs)
                .iter()
                .find(|i| i.id == id)
                .map(|i| !i.available)
                .unwrap_or(true);
            let patch = ItemPatch {
                available: Some(available),
                ..ItemPatch::default()
            };
            let item = menu.edit(&*docs, id, patch)?;
            println!("{}: available={}", item.name, item.available);
        }
        Commands::RemoveItem { id } => {
            let item = canteen.menu().remove(&*docs, id)?;
            println!("Removed {}", item.name);
        }
        Commands::Register {
            name,
            email,
            phone,
            password,
        } => {
            let user = canteen.accounts(MemStorage::new()).register(
                &*docs,
                Registration {
                    name,
                    email,
                    phone,
                    confirm: password.clone(),
                    password,
                },
            )?;
            println!("Registered {}", user.email);
        }
        Commands::Order {
            email,
            password,
            items,
        } => {
            let accounts = canteen.accounts(MemStorage::new());
            let login = accounts.login(&*docs, &email, &password)?;
            if login.role != Role::Customer {
                bail!("staff accounts cannot place orders");
            }

            let menu = canteen.menu();
            let mut cart = Cart::load(&*docs);
            for name in items.iter() {
                match menu.find(&*docs, name) {
                    Some(item) => cart.add(&item),
                    None => bail!("{:?} is not on the menu", name),
                }
            }
            cart.save(&*docs);

            let mut orders = canteen.orders()?;
            let order = canteen
                .checkout(Box::new(OfflineGateway))
                .place(&*docs, &accounts, &mut orders)?;
            println!(
                "Order {} ({}) total {} PIN {} status {}",
                order.order_id,
                order.id,
                order.total.currency(),
                order.pin,
                order.status
            );
        }
        Commands::Orders { status, search } => {
            let orders = canteen.orders()?;
            let list = match (search, status) {
                (Some(term), status) => orders.search(&term, status),
                (None, Some(status)) => orders.filter_by_status(status),
                (None, None) => orders.all(),
            };
            for order in list {
                println!(
                    "{} {} {} {} {} {}",
                    order.id,
                    order.order_id,
                    order.timestamp.format("%Y-%m-%d %H:%M"),
                    order.user_email,
                    order.total.currency(),
                    order.status
                );
            }
        }
        Commands::Advance { id, status } => {
            let mut orders = canteen.orders()?;
            let order = orders.update_status(&*docs, id, status)?;
            println!("{} is now {}", order.order_id, order.status);
        }
        Commands::Complete { id, pin } => {
            let mut orders = canteen.orders()?;
            let order = orders.complete(&*docs, id, &pin)?;
            println!("{} is now {}", order.order_id, order.status);
        }
        Commands::Stats => {
            let orders = canteen.orders()?;
            let mut stats = canteen.stats();
            for scope in [Scope::Today, Scope::Month, Scope::Year].iter() {
                let report = stats.snapshot(&*docs, &orders, *scope)?;
                let totals = report.snapshot.totals;
                println!(
                    "{:?} ({}): {} orders, revenue {}, profit {}",
                    scope,
                    report.snapshot.period,
                    totals.orders,
                    totals.revenue.currency(),
                    totals.profit.currency()
                );
            }
            let manager = stats.manager_dashboard(&*docs, &orders);
            println!(
                "Pending {}, ready {}, completed {}",
                manager.pending, manager.ready, manager.completed
            );
            println!(
                "Today vs yesterday: revenue {}%, orders {}%",
                manager.change_vs_yesterday, manager.orders_change_vs_yesterday
            );
            println!(
                "All time revenue {}",
                manager.all_time_revenue.currency()
            );
        }
        Commands::Statement => {
            let orders = canteen.orders()?;
            let statement = Statement::for_year(&*docs, &orders, canteen.clock().now())?;
            print!("{}", statement);
        }
        Commands::SendMessage {
            name,
            email,
            message,
        } => {
            let sent = canteen.messages().send(&*docs, &name, &email, &message)?;
            println!("Sent message {}", sent.id);
        }
        Commands::Inbox => {
            for msg in canteen.messages().inbox(&*docs) {
                let flag = if msg.read { " " } else { "*" };
                println!(
                    "{}{} {} <{}>: {}",
                    flag,
                    msg.timestamp.format("%Y-%m-%d %H:%M"),
                    msg.name,
                    msg.email,
                    msg.message
                );
            }
        }
    }

    Ok(())
}
