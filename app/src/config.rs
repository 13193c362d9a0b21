use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use serde::{Deserialize, Serialize};

use infra::persistence::{DocumentConnectionManager, Documents};

use crate::cart::OperatingHours;

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub db: StoreConfig,
    pub orders: OrdersConfig,
    pub notifications: NotificationsConfig,
    pub stats: StatsConfig,
    pub hours: OperatingHours,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub temporary: bool,
    pub pool_size: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OrdersConfig {
    pub cache_limit: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    pub debounce_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct StatsConfig {
    pub cache_ttl_secs: u64,
}

/// Values the services read, resolved from a [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub order_cache_limit: usize,
    pub debounce: chrono::Duration,
    pub stats_ttl: chrono::Duration,
    pub hours: OperatingHours,
}

const MIN_DEBOUNCE_MS: u64 = 100;
const MAX_DEBOUNCE_MS: u64 = 500;

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("canteen.db"),
            temporary: false,
            pool_size: 4,
        }
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        OrdersConfig { cache_limit: 10_000 }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        NotificationsConfig { debounce_ms: 250 }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig { cache_ttl_secs: 30 }
    }
}

impl StoreConfig {
    pub(crate) fn build(&self) -> Result<Pool<DocumentConnectionManager>> {
        debug!("Build pool from {:?}", self);

        let docs = if self.temporary {
            Documents::temporary()?
        } else {
            Documents::open(&self.path)?
        };
        let manager = DocumentConnectionManager::new(docs);

        let builder = r2d2::Pool::builder().max_size(self.pool_size.max(1));

        debug!("Pool builder: {:?}", builder);
        let pool = builder.build(manager).context("build pool")?;

        Ok(pool)
    }
}

impl Config {
    /// A config for a throwaway store, as used by tests.
    pub fn temporary() -> Self {
        let mut config = Config::default();
        config.db.temporary = true;
        config
    }

    /// Applies `CANTEEN_*` environment overrides.
    pub fn with_env(mut self) -> Result<Self> {
        let overrides = envy::prefixed("CANTEEN_")
            .from_env::<Overrides>()
            .context("read CANTEEN_ environment")?;
        overrides.apply(&mut self);
        Ok(self)
    }

    pub fn settings(&self) -> Settings {
        let debounce_ms = self
            .notifications
            .debounce_ms
            .max(MIN_DEBOUNCE_MS)
            .min(MAX_DEBOUNCE_MS);
        if debounce_ms != self.notifications.debounce_ms {
            warn!(
                "Debounce of {}ms out of range; using {}ms",
                self.notifications.debounce_ms, debounce_ms
            );
        }
        Settings {
            order_cache_limit: self.orders.cache_limit.max(1),
            debounce: chrono::Duration::milliseconds(debounce_ms as i64),
            stats_ttl: chrono::Duration::seconds(self.stats.cache_ttl_secs as i64),
            hours: self.hours.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct Overrides {
    db_path: Option<PathBuf>,
    debounce_ms: Option<u64>,
    stats_ttl_secs: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(path) = self.db_path {
            info!("Store path from environment: {:?}", path);
            config.db.path = path;
        }
        if let Some(ms) = self.debounce_ms {
            config.notifications.debounce_ms = ms;
        }
        if let Some(secs) = self.stats_ttl_secs {
            config.stats.cache_ttl_secs = secs;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct EnvLogger {
    level: Option<LogLevel>,
    modules: HashMap<String, LogLevel>,
    timestamp_nanos: bool,
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl EnvLogger {
    pub fn builder(&self) -> env_logger::Builder {
        let mut b = env_logger::Builder::from_default_env();
        if let Some(level) = self.level {
            b.filter_level(level.to_filter());
        }

        for (module, level) in self.modules.iter() {
            b.filter_module(&module, level.to_filter());
        }

        if self.timestamp_nanos {
            b.format_timestamp_nanos();
        }

        b
    }
}
