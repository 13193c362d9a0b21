use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use err_derive::Error;
use serde::Serialize;

use infra::persistence::Storage;

use crate::money::Money;
use crate::orders::{OrderCode, OrderStatus, OrderStore};
use crate::stats::{aggregate, Aggregate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    #[error(display = "no completed orders for the current year ({})", _0)]
    NoOrders(i32),
}

/// Completed orders for one calendar year, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub year: i32,
    pub summary: Aggregate,
    pub rows: Vec<StatementRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRow {
    pub date: DateTime<Utc>,
    pub order_id: OrderCode,
    pub amount: Money,
    pub profit: Money,
}

impl Statement {
    /// The statement for the year containing `now`, drawn from every stored
    /// order.
    pub fn for_year(
        docs: &dyn Storage,
        orders: &OrderStore,
        now: DateTime<Utc>,
    ) -> Result<Statement, StatementError> {
        let year = now.year();
        let mut completed = orders
            .history(docs)
            .into_iter()
            .filter(|o| o.status == OrderStatus::Completed && o.timestamp.year() == year)
            .collect::<Vec<_>>();
        if completed.is_empty() {
            return Err(StatementError::NoOrders(year));
        }
        completed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let rows = completed
            .iter()
            .map(|o| StatementRow {
                date: o.timestamp,
                order_id: o.order_id.clone(),
                amount: o.total,
                profit: o.profit(),
            })
            .collect();
        Ok(Statement {
            year,
            summary: aggregate(&completed, None, None),
            rows,
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(fmt, "Annual statement {}", self.year)?;
        writeln!(fmt, "Completed orders: {}", self.summary.orders)?;
        writeln!(fmt, "Revenue: {}", self.summary.revenue.currency())?;
        writeln!(fmt, "Profit (5%): {}", self.summary.profit.currency())?;
        writeln!(fmt)?;
        for row in self.rows.iter() {
            writeln!(fmt, "{}", row)?;
        }
        Ok(())
    }
}

impl fmt::Display for StatementRow {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{:<12} {:<18} {:>12} {:>10}",
            self.date.format("%-d %b %Y").to_string(),
            self.order_id.as_str(),
            self.amount.currency(),
            self.profit.currency()
        )
    }
}
