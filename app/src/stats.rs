//! Revenue and order counts over calendar windows.
//!
//! Only completed orders count. Windows are half-open (`[start, end)`) and
//! computed in UTC from the clock on every call, so a long-lived context
//! rolls over into a new day without being told. Results are memoised for a
//! short TTL; a figure may lag a fresh completion by up to that long.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use infra::clock::Clock;
use infra::memo::TtlCache;
use infra::persistence::{Storage, StorageExt};

use crate::keys;
use crate::money::Money;
use crate::orders::{Order, OrderStatus, OrderStore};

const MEMO_ENTRIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Today,
    Yesterday,
    Month,
    Year,
    AllTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub orders: usize,
    pub revenue: Money,
    pub profit: Money,
}

/// A persisted running figure for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub period: String,
    #[serde(flatten)]
    pub totals: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    pub snapshot: Snapshot,
    /// The stored snapshot belonged to an earlier period and was reset.
    pub rolled_over: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerDashboard {
    pub today: Aggregate,
    /// Today's revenue against yesterday's, as a whole percentage.
    pub change_vs_yesterday: i64,
    /// Today's completed order count against yesterday's.
    pub orders_change_vs_yesterday: i64,
    pub pending: usize,
    pub ready: usize,
    pub completed: usize,
    pub year_revenue: Money,
    pub all_time_revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminDashboard {
    pub all_time: Aggregate,
    pub year: Aggregate,
}

impl Scope {
    /// `[start, end)` for the period containing `now`; `None` is unbounded.
    pub fn window(self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let midnight = now.date().and_hms(0, 0, 0);
        match self {
            Scope::Today => (Some(midnight), Some(midnight + Duration::days(1))),
            Scope::Yesterday => (Some(midnight - Duration::days(1)), Some(midnight)),
            Scope::Month => {
                let (year, month) = (now.year(), now.month());
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                (
                    Some(Utc.ymd(year, month, 1).and_hms(0, 0, 0)),
                    Some(Utc.ymd(next_year, next_month, 1).and_hms(0, 0, 0)),
                )
            }
            Scope::Year => (
                Some(Utc.ymd(now.year(), 1, 1).and_hms(0, 0, 0)),
                Some(Utc.ymd(now.year() + 1, 1, 1).and_hms(0, 0, 0)),
            ),
            Scope::AllTime => (None, None),
        }
    }

    /// Names the period containing `now`; changes exactly when the window
    /// moves on.
    pub fn period_key(self, now: DateTime<Utc>) -> String {
        match self {
            Scope::Today => now.format("%Y-%m-%d").to_string(),
            Scope::Yesterday => (now - Duration::days(1)).format("%Y-%m-%d").to_string(),
            Scope::Month => now.format("%Y-%m").to_string(),
            Scope::Year => now.format("%Y").to_string(),
            Scope::AllTime => "all".to_string(),
        }
    }

    /// Where the running snapshot for this scope is kept, if anywhere.
    pub fn snapshot_key(self) -> Option<&'static str> {
        match self {
            Scope::Today => Some(keys::DAILY_STATS),
            Scope::Month => Some(keys::MONTHLY_STATS),
            Scope::Year => Some(keys::YEARLY_STATS),
            Scope::Yesterday | Scope::AllTime => None,
        }
    }
}

/// Sums completed orders inside `[start, end)`.
pub fn aggregate<'a, I>(
    orders: I,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Aggregate
where
    I: IntoIterator<Item = &'a Order>,
{
    let mut orders_seen = 0;
    let mut revenue = Money::ZERO;
    for order in orders {
        if order.status != OrderStatus::Completed {
            continue;
        }
        if start.map_or(false, |s| order.timestamp < s)
            || end.map_or(false, |e| order.timestamp >= e)
        {
            continue;
        }
        orders_seen += 1;
        revenue = revenue + order.total;
    }
    Aggregate {
        orders: orders_seen,
        revenue,
        profit: revenue.profit(),
    }
}

/// Whole-percent change from `before` to `after`; zero when there is no
/// baseline.
pub fn percent_change(before: Money, after: Money) -> i64 {
    change_between(before.cents(), after.cents())
}

/// As [`percent_change`], for order counts.
pub fn count_change(before: usize, after: usize) -> i64 {
    change_between(before as i64, after as i64)
}

fn change_between(before: i64, after: i64) -> i64 {
    if before == 0 {
        return 0;
    }
    let delta = (after - before) as f64;
    (delta / before as f64 * 100.0).round() as i64
}

pub struct Stats {
    clock: Arc<dyn Clock>,
    memo: TtlCache<(Scope, String), Aggregate>,
}

impl Stats {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Stats {
            clock,
            memo: TtlCache::new(ttl, MEMO_ENTRIES),
        }
    }

    /// Totals for `scope` over every stored order, not just the cached ones.
    pub fn aggregate(
        &mut self,
        docs: &dyn Storage,
        orders: &OrderStore,
        scope: Scope,
    ) -> Aggregate {
        let now = self.clock.now();
        let key = (scope, scope.period_key(now));
        self.memo.get_or_insert_with(key, now, || {
            let (start, end) = scope.window(now);
            let totals = aggregate(&orders.history(docs), start, end);
            debug!("Computed {:?} stats: {:?}", scope, totals);
            totals
        })
    }

    /// Refreshes the stored running figure for `scope`, resetting it first
    /// if it belongs to an earlier period.
    pub fn snapshot(
        &mut self,
        docs: &dyn Storage,
        orders: &OrderStore,
        scope: Scope,
    ) -> Result<SnapshotReport> {
        let key = scope
            .snapshot_key()
            .ok_or_else(|| anyhow!("no snapshot is kept for {:?}", scope))?;
        let period = scope.period_key(self.clock.now());

        let stored = docs.load_or_default::<Option<Snapshot>>(key);
        let rolled_over = match stored {
            Some(ref prev) if prev.period != period => {
                info!("{} rolled over from {} to {}", key, prev.period, period);
                true
            }
            _ => false,
        };
        let mut snapshot = match stored {
            Some(prev) if !rolled_over => prev,
            _ => Snapshot {
                period,
                totals: Aggregate::default(),
            },
        };
        if rolled_over {
            docs.save_or_warn(key, &snapshot);
        }

        snapshot.totals = self.aggregate(docs, orders, scope);
        docs.save(key, &snapshot)?;
        Ok(SnapshotReport {
            snapshot,
            rolled_over,
        })
    }

    pub fn manager_dashboard(
        &mut self,
        docs: &dyn Storage,
        orders: &OrderStore,
    ) -> ManagerDashboard {
        let today = self.aggregate(docs, orders, Scope::Today);
        let yesterday = self.aggregate(docs, orders, Scope::Yesterday);
        let completed = self.aggregate(docs, orders, Scope::AllTime);
        let history = orders.history(docs);
        let count = |status: OrderStatus| history.iter().filter(|o| o.status == status).count();
        ManagerDashboard {
            today,
            change_vs_yesterday: percent_change(yesterday.revenue, today.revenue),
            orders_change_vs_yesterday: count_change(yesterday.orders, today.orders),
            pending: count(OrderStatus::Pending),
            ready: count(OrderStatus::Ready),
            completed: completed.orders,
            year_revenue: self.aggregate(docs, orders, Scope::Year).revenue,
            all_time_revenue: completed.revenue,
        }
    }

    pub fn admin_dashboard(&mut self, docs: &dyn Storage, orders: &OrderStore) -> AdminDashboard {
        AdminDashboard {
            all_time: self.aggregate(docs, orders, Scope::AllTime),
            year: self.aggregate(docs, orders, Scope::Year),
        }
    }
}

impl fmt::Debug for Stats {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Stats")
            .field("ttl", &self.memo.ttl())
            .field("memoised", &self.memo.len())
            .finish()
    }
}
