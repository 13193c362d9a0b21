use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::*;
use serde_json::Value;

use infra::bus::Bus;
use infra::clock::Clock;
use infra::ids::{Id, IdGen};
use infra::persistence::{Storage, StorageExt};

use super::models::{normalize, Order, OrderStatus, Repairs};
use super::status::{self, StatusError};
use crate::events::Change;
use crate::keys;

/// One context's cached view of the `orders` collection.
///
/// Reads are served from memory; every write goes back to the shared store
/// as a whole-collection read-modify-write and is then announced on the bus.
/// At most `limit` orders are cached, dropping the oldest first; the stored
/// collection itself is never trimmed.
pub struct OrderStore {
    index: HashMap<Id<Order>, Order>,
    recency: VecDeque<Id<Order>>,
    limit: usize,
    bus: Bus<Change>,
    clock: Arc<dyn Clock>,
    idgen: Arc<IdGen>,
}

impl OrderStore {
    pub fn new(bus: Bus<Change>, clock: Arc<dyn Clock>, idgen: Arc<IdGen>, limit: usize) -> Self {
        OrderStore {
            index: HashMap::new(),
            recency: VecDeque::new(),
            limit: limit.max(1),
            bus,
            clock,
            idgen,
        }
    }

    /// Replaces the cache with the stored collection. Unreadable data loads
    /// as an empty collection. Fields that needed defaults filling in are
    /// written back into their own records; no record is ever removed.
    pub fn load(&mut self, docs: &dyn Storage) {
        let mut records = raw_records(docs);
        let now = self.clock.now();
        let mut rng = rand::thread_rng();

        self.index.clear();
        self.recency.clear();

        let mut repaired = 0;
        let mut seen = HashSet::with_capacity(records.len());
        let mut all = Vec::with_capacity(records.len());
        for raw in records.iter_mut() {
            let (order, repairs) = match normalize(raw, now, &self.idgen, &mut rng) {
                Some(normalized) => normalized,
                None => {
                    warn!("Skipping malformed order record: {}", raw);
                    continue;
                }
            };
            if repairs.any() {
                write_repairs(raw, &order, &repairs);
                repaired += 1;
            }
            if !seen.insert(order.id) {
                warn!("Order {} is stored more than once; caching the first", order.id);
                continue;
            }
            all.push(order);
        }

        if repaired > 0 {
            info!("Writing back {} repaired orders", repaired);
            docs.save_or_warn(keys::ORDERS, &records);
        }

        for order in all.into_iter().take(self.limit) {
            self.recency.push_back(order.id);
            self.index.insert(order.id, order);
        }
        debug!("Loaded {} orders", self.index.len());
    }

    /// Every stored order, read from the shared store rather than the
    /// cache, so nothing beyond the cache limit is missed. Nothing is
    /// written back.
    pub fn history(&self, docs: &dyn Storage) -> Vec<Order> {
        let now = self.clock.now();
        let mut rng = rand::thread_rng();
        raw_records(docs)
            .iter()
            .filter_map(|raw| normalize(raw, now, &self.idgen, &mut rng))
            .map(|(order, _)| order)
            .collect()
    }

    /// Adds a new order to the front of the collection, assigning an id if
    /// it has none.
    pub fn insert(&mut self, docs: &dyn Storage, mut order: Order) -> Result<Order> {
        if order.id.is_unset() {
            order.id = self.idgen.generate_at(self.clock.now());
        }

        let mut records = raw_records(docs);
        let record = serde_json::to_value(&order).context("encode order")?;
        records.insert(0, record);
        docs.save(keys::ORDERS, &records)
            .with_context(|| format!("save order {}", order.id))?;

        self.cache_front(order.clone());
        info!("Placed order {} ({})", order.order_id, order.id);
        self.bus.publish(Change::OrdersChanged);
        Ok(order)
    }

    pub fn find_by_id(&self, id: Id<Order>) -> Option<&Order> {
        self.index.get(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every cached order, newest first.
    pub fn all(&self) -> Vec<&Order> {
        newest_first(self.index.values())
    }

    pub fn filter_by_status(&self, status: OrderStatus) -> Vec<&Order> {
        newest_first(self.index.values().filter(|o| o.status == status))
    }

    /// Completed orders with `start <= timestamp <= end`.
    pub fn filter_by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Order> {
        newest_first(self.index.values().filter(|o| {
            o.status == OrderStatus::Completed && o.timestamp >= start && o.timestamp <= end
        }))
    }

    /// Case-insensitive match on the order code.
    pub fn search(&self, term: &str, status: Option<OrderStatus>) -> Vec<&Order> {
        let term = term.trim().to_lowercase();
        newest_first(self.index.values().filter(|o| {
            status.map_or(true, |s| o.status == s)
                && o.order_id.as_str().to_lowercase().contains(&term)
        }))
    }

    pub fn for_customer(&self, email: &str) -> Vec<&Order> {
        newest_first(
            self.index
                .values()
                .filter(|o| o.user_email.eq_ignore_ascii_case(email)),
        )
    }

    /// Moves an order along its lifecycle. Completion needs a PIN, so use
    /// [`OrderStore::complete`] for that.
    pub fn update_status(
        &mut self,
        docs: &dyn Storage,
        id: Id<Order>,
        status: OrderStatus,
    ) -> Result<Order, StatusError> {
        self.transition(docs, id, status, None)
    }

    pub fn complete(
        &mut self,
        docs: &dyn Storage,
        id: Id<Order>,
        pin: &str,
    ) -> Result<Order, StatusError> {
        self.transition(docs, id, OrderStatus::Completed, Some(pin))
    }

    fn transition(
        &mut self,
        docs: &dyn Storage,
        id: Id<Order>,
        requested: OrderStatus,
        pin: Option<&str>,
    ) -> Result<Order, StatusError> {
        let mut records = raw_records(docs);
        let position = records.iter().position(|r| record_id(r) == Some(id));

        let order = self.index.get_mut(&id).ok_or(StatusError::NotFound(id))?;

        // Another context may already have moved this order on.
        if let Some(stored) = position
            .and_then(|pos| records[pos].get("status"))
            .and_then(Value::as_str)
            .map(OrderStatus::lenient)
        {
            if stored.rank() > order.status.rank() {
                debug!("Order {} is already {} in the store", id, stored);
                order.status = stored;
            }
        }

        if let Err(e) = status::authorize(order, requested, pin) {
            info!("Rejected {} -> {} for order {}: {}", order.status, requested, id, e);
            return Err(e);
        }

        let from = order.status;
        order.status = requested;
        let updated = order.clone();

        match position.and_then(|pos| records[pos].as_object_mut()) {
            Some(record) => {
                record.insert("status".to_string(), Value::from(requested.as_str()));
            }
            None => match serde_json::to_value(&updated) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Could not encode order {}: {}", id, e),
            },
        }
        docs.save_or_warn(keys::ORDERS, &records);

        info!("Order {} {} -> {}", updated.order_id, from, requested);
        self.bus.publish(Change::OrdersChanged);
        Ok(updated)
    }

    fn cache_front(&mut self, order: Order) {
        if self.index.insert(order.id, order.clone()).is_some() {
            self.recency.retain(|id| *id != order.id);
        }
        self.recency.push_front(order.id);
        while self.recency.len() > self.limit {
            if let Some(oldest) = self.recency.pop_back() {
                trace!("Evicting order {} from cache", oldest);
                self.index.remove(&oldest);
            }
        }
    }
}

impl fmt::Debug for OrderStore {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("OrderStore")
            .field("cached", &self.index.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// The stored collection as raw JSON, so writes keep fields this crate
/// does not know about.
fn raw_records(docs: &dyn Storage) -> Vec<Value> {
    match docs.load_or_default::<Value>(keys::ORDERS) {
        Value::Array(records) => records,
        Value::Null => Vec::new(),
        other => {
            warn!("Stored orders are not a list: {}", other);
            Vec::new()
        }
    }
}

/// Copies the fields named in `repairs` from the normalised `order` into
/// its stored record, leaving every other field as it was.
fn write_repairs(record: &mut Value, order: &Order, repairs: &Repairs) {
    let repaired = match serde_json::to_value(order) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return,
        Err(e) => {
            warn!("Could not encode repaired order {}: {}", order.id, e);
            return;
        }
    };
    if let Some(record) = record.as_object_mut() {
        for name in repairs.fields() {
            if let Some(value) = repaired.get(*name) {
                record.insert((*name).to_string(), value.clone());
            }
        }
    }
}

fn record_id(record: &Value) -> Option<Id<Order>> {
    record
        .get("id")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn newest_first<'a, I: Iterator<Item = &'a Order>>(orders: I) -> Vec<&'a Order> {
    let mut orders = orders.collect::<Vec<_>>();
    orders.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    orders
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::money::Money;
    use crate::orders::models::{OrderCode, OrderLine, Pin};
    use crate::orders::status::PinError;
    use chrono::{Duration, TimeZone};
    use infra::clock::ManualClock;
    use infra::persistence::MemStorage;
    use serde_json::json;

    struct Fixture {
        docs: MemStorage,
        clock: ManualClock,
        bus: Bus<Change>,
        store: OrderStore,
    }

    fn t0() -> DateTime<Utc> {
        Utc.ymd(2026, 10, 18).and_hms(11, 0, 0)
    }

    fn fixture(limit: usize) -> Fixture {
        env_logger::try_init().unwrap_or_default();
        let clock = ManualClock::at(t0());
        let bus = Bus::new();
        let store = OrderStore::new(
            bus.clone(),
            Arc::new(clock.clone()),
            Arc::new(IdGen::new()),
            limit,
        );
        Fixture {
            docs: MemStorage::new(),
            clock,
            bus,
            store,
        }
    }

    fn order(code: &str, at: DateTime<Utc>, status: OrderStatus, cents: i64) -> Order {
        Order {
            id: Id::default(),
            order_id: OrderCode::from(code),
            timestamp: at,
            items: vec![OrderLine {
                name: "Beef Burger".into(),
                price: Money::from_cents(cents),
                quantity: 1,
                category: Default::default(),
            }],
            total: Money::from_cents(cents),
            user_email: "sipho@example.com".into(),
            pin: Pin::from("112233"),
            status,
        }
    }

    impl Fixture {
        fn place(&mut self, code: &str, status: OrderStatus, cents: i64) -> Order {
            let at = self.clock.now();
            self.clock.advance(Duration::minutes(1));
            self.store
                .insert(&self.docs, order(code, at, status, cents))
                .expect("insert")
        }

        fn stored(&self) -> Vec<Value> {
            self.docs.load(keys::ORDERS).expect("load").expect("present")
        }
    }

    #[test]
    fn insert_assigns_id_prepends_and_announces() {
        let mut fx = fixture(100);
        let sub = fx.bus.subscribe();

        let first = fx.place("MNT20261018-1111", OrderStatus::Pending, 12999);
        let second = fx.place("MNT20261018-2222", OrderStatus::Pending, 2500);

        assert!(!first.id.is_unset());
        assert!(second.id > first.id);
        let stored = fx.stored();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["orderId"], json!("MNT20261018-2222"));
        assert_eq!(
            fx.store.find_by_id(first.id).map(|o| &o.order_id),
            Some(&first.order_id)
        );
        assert_eq!(
            sub.drain(),
            vec![Change::OrdersChanged, Change::OrdersChanged]
        );
    }

    #[test]
    fn reload_reads_back_what_was_written() {
        let mut fx = fixture(100);
        let placed = vec![
            fx.place("MNT20261018-1111", OrderStatus::Pending, 12999),
            fx.place("MNT20261018-2222", OrderStatus::Ready, 2500),
        ];

        let mut other = fixture(100);
        other.store.load(&fx.docs);

        let mut loaded = other.store.all().into_iter().cloned().collect::<Vec<_>>();
        loaded.sort_by_key(|o| o.id);
        assert_eq!(loaded, placed);
    }

    #[test]
    fn malformed_collection_loads_empty() {
        let mut fx = fixture(100);
        fx.docs.put_raw(keys::ORDERS, b"[{oops").expect("put");
        fx.store.load(&fx.docs);
        assert!(fx.store.is_empty());

        fx.docs.save(keys::ORDERS, &json!({"not": "a list"})).expect("save");
        fx.store.load(&fx.docs);
        assert!(fx.store.is_empty());
    }

    #[test]
    fn load_repairs_and_writes_back_partial_records() {
        let mut fx = fixture(100);
        fx.docs
            .save(
                keys::ORDERS,
                &json!([
                    {"status": "READY", "total": 40, "note": "no onions"},
                    "junk",
                    {"id": 7, "orderId": "MNT20261018-7777"}
                ]),
            )
            .expect("save");

        fx.store.load(&fx.docs);

        assert_eq!(fx.store.len(), 2);
        let stored = fx.stored();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0]["status"], json!("ready"));
        assert_eq!(stored[0]["userEmail"], json!("unknown@email.com"));
        assert_eq!(stored[0]["total"], json!(40));
        assert_eq!(stored[0]["note"], json!("no onions"));
        assert_eq!(stored[1], json!("junk"));
        assert_eq!(stored[2]["id"], json!(7));
        assert_eq!(stored[2]["orderId"], json!("MNT20261018-7777"));

        let repaired_id = record_id(&stored[0]).expect("id");
        fx.store.load(&fx.docs);
        assert!(fx.store.find_by_id(repaired_id).is_some());
        assert_eq!(fx.stored(), stored);
    }

    #[test]
    fn load_keeps_records_sharing_an_id() {
        let mut fx = fixture(100);
        let first = order("MNT20261018-1111", t0(), OrderStatus::Pending, 100);
        let second = order("MNT20261018-2222", t0(), OrderStatus::Ready, 200);
        let records = vec![
            Order {
                id: Id::from_raw(1_760_789_400_123),
                ..first
            },
            Order {
                id: Id::from_raw(1_760_789_400_123),
                ..second
            },
        ];
        fx.docs.save(keys::ORDERS, &records).expect("save");

        fx.store.load(&fx.docs);

        assert_eq!(fx.store.len(), 1);
        assert_eq!(
            fx.store
                .find_by_id(Id::from_raw(1_760_789_400_123))
                .map(|o| o.order_id.as_str()),
            Some("MNT20261018-1111")
        );
        let stored = fx.stored();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1]["orderId"], json!("MNT20261018-2222"));
        assert_eq!(fx.store.history(&fx.docs).len(), 2);
    }

    #[test]
    fn unrepresentable_total_loads_as_zero() {
        let mut fx = fixture(100);
        fx.docs
            .save(
                keys::ORDERS,
                &json!([{
                    "id": 9,
                    "orderId": "MNT20261018-9999",
                    "timestamp": "2026-10-18T09:00:00Z",
                    "items": [],
                    "total": 100_000_000_000_000_000u64,
                    "userEmail": "big@spender.com",
                    "pin": "123456",
                    "status": "pending"
                }]),
            )
            .expect("save");

        fx.store.load(&fx.docs);

        let order = fx.store.find_by_id(Id::from_raw(9)).expect("cached");
        assert_eq!(order.total, Money::ZERO);
        assert_eq!(order.user_email, "big@spender.com");
    }

    #[test]
    fn history_reaches_past_the_cache_limit() {
        let mut fx = fixture(2);
        for i in 0..3 {
            fx.place(&format!("MNT20261018-{}", 1000 + i), OrderStatus::Completed, 1000);
        }
        fx.store.load(&fx.docs);

        assert_eq!(fx.store.len(), 2);
        assert_eq!(fx.store.history(&fx.docs).len(), 3);
    }

    #[test]
    fn cache_drops_oldest_beyond_limit() {
        let mut fx = fixture(2);
        let oldest = fx.place("MNT20261018-1000", OrderStatus::Pending, 100);
        fx.place("MNT20261018-2000", OrderStatus::Pending, 100);
        fx.place("MNT20261018-3000", OrderStatus::Pending, 100);

        assert_eq!(fx.store.len(), 2);
        assert!(fx.store.find_by_id(oldest.id).is_none());
        assert_eq!(fx.stored().len(), 3);
    }

    #[test]
    fn statuses_partition_the_collection() {
        let mut fx = fixture(100);
        for (i, status) in [
            OrderStatus::Pending,
            OrderStatus::Ready,
            OrderStatus::Completed,
            OrderStatus::Ready,
            OrderStatus::Pending,
        ]
        .iter()
        .enumerate()
        {
            fx.place(&format!("MNT20261018-{}", 1000 + i), *status, 100);
        }

        let mut seen = Vec::new();
        for status in OrderStatus::ALL.iter() {
            seen.extend(fx.store.filter_by_status(*status).iter().map(|o| o.id));
        }
        seen.sort();
        let mut all = fx.store.all().iter().map(|o| o.id).collect::<Vec<_>>();
        all.sort();
        assert_eq!(seen, all);
    }

    #[test]
    fn filters_are_newest_first() {
        let mut fx = fixture(100);
        let a = fx.place("MNT20261018-1000", OrderStatus::Pending, 100);
        let b = fx.place("MNT20261018-2000", OrderStatus::Pending, 100);
        let ids = fx
            .store
            .filter_by_status(OrderStatus::Pending)
            .iter()
            .map(|o| o.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn date_range_is_inclusive_and_completed_only() {
        let mut fx = fixture(100);
        let start = fx.clock.now();
        let first = fx.place("MNT20261018-1000", OrderStatus::Completed, 100);
        fx.place("MNT20261018-2000", OrderStatus::Ready, 100);
        let last = fx.place("MNT20261018-3000", OrderStatus::Completed, 100);
        fx.place("MNT20261018-4000", OrderStatus::Completed, 100);

        let ids = fx
            .store
            .filter_by_date_range(start, last.timestamp)
            .iter()
            .map(|o| o.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![last.id, first.id]);
    }

    #[test]
    fn search_matches_code_case_insensitively() {
        let mut fx = fixture(100);
        fx.place("MNT20261018-1234", OrderStatus::Pending, 100);
        fx.place("MNT20261018-5678", OrderStatus::Ready, 100);

        assert_eq!(fx.store.search("mnt", None).len(), 2);
        assert_eq!(fx.store.search("1234", None).len(), 1);
        assert_eq!(fx.store.search("mnt", Some(OrderStatus::Ready)).len(), 1);
        assert!(fx.store.search("1234", Some(OrderStatus::Ready)).is_empty());
    }

    #[test]
    fn advancing_writes_only_the_status() {
        let mut fx = fixture(100);
        let placed = fx.place("MNT20261018-1234", OrderStatus::Pending, 100);
        let mut stored = fx.stored();
        stored[0]["note"] = json!("extra");
        fx.docs.save(keys::ORDERS, &stored).expect("save");
        let sub = fx.bus.subscribe();

        let ready = fx
            .store
            .update_status(&fx.docs, placed.id, OrderStatus::Ready)
            .expect("advance");

        assert_eq!(ready.status, OrderStatus::Ready);
        let stored = fx.stored();
        assert_eq!(stored[0]["status"], json!("ready"));
        assert_eq!(stored[0]["note"], json!("extra"));
        assert_eq!(sub.drain(), vec![Change::OrdersChanged]);
    }

    #[test]
    fn regression_leaves_status_alone() {
        let mut fx = fixture(100);
        let placed = fx.place("MNT20261018-1234", OrderStatus::Ready, 100);
        let sub = fx.bus.subscribe();

        let err = fx
            .store
            .update_status(&fx.docs, placed.id, OrderStatus::Pending)
            .expect_err("regression");

        assert_eq!(err.to_string(), "cannot change status from ready to pending");
        assert_eq!(
            fx.store.find_by_id(placed.id).map(|o| o.status),
            Some(OrderStatus::Ready)
        );
        assert_eq!(fx.stored()[0]["status"], json!("ready"));
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn completion_is_pin_gated_and_final() {
        let mut fx = fixture(100);
        let placed = fx.place("MNT20261018-1234", OrderStatus::Ready, 100);

        assert_eq!(
            fx.store
                .update_status(&fx.docs, placed.id, OrderStatus::Completed)
                .expect_err("no pin"),
            StatusError::PinRequired
        );
        assert_eq!(
            fx.store
                .complete(&fx.docs, placed.id, "999999")
                .expect_err("wrong pin"),
            StatusError::Pin(PinError::Incorrect)
        );
        assert_eq!(fx.stored()[0]["status"], json!("ready"));

        let done = fx.store.complete(&fx.docs, placed.id, "112233").expect("pin");
        assert_eq!(done.status, OrderStatus::Completed);
        assert_eq!(
            fx.store
                .complete(&fx.docs, placed.id, "112233")
                .expect_err("retry"),
            StatusError::Completed
        );
    }

    #[test]
    fn stored_progress_from_other_contexts_wins() {
        let mut fx = fixture(100);
        let placed = fx.place("MNT20261018-1234", OrderStatus::Pending, 100);

        let mut manager = fixture(100);
        manager.store.load(&fx.docs);
        manager
            .store
            .update_status(&fx.docs, placed.id, OrderStatus::Ready)
            .expect("advance");

        // This context still believes the order is pending.
        let err = fx
            .store
            .update_status(&fx.docs, placed.id, OrderStatus::Pending)
            .expect_err("stale regression");
        assert_eq!(
            err,
            StatusError::Regression {
                from: OrderStatus::Ready,
                to: OrderStatus::Pending
            }
        );
        assert_eq!(fx.stored()[0]["status"], json!("ready"));
    }

    #[test]
    fn missing_stored_record_is_appended() {
        let mut fx = fixture(100);
        let placed = fx.place("MNT20261018-1234", OrderStatus::Pending, 100);
        fx.docs.remove(keys::ORDERS).expect("remove");

        fx.store
            .update_status(&fx.docs, placed.id, OrderStatus::Ready)
            .expect("advance");

        let stored = fx.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["status"], json!("ready"));
        assert_eq!(record_id(&stored[0]), Some(placed.id));
    }

    #[test]
    fn unknown_order_is_not_found() {
        let mut fx = fixture(100);
        let id = Id::from_raw(42);
        assert_eq!(
            fx.store
                .update_status(&fx.docs, id, OrderStatus::Ready)
                .expect_err("missing"),
            StatusError::NotFound(id)
        );
    }
}
