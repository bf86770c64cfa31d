//! Worker pool replaying pricing transactions
//!
//! Each worker runs on a blocking thread and owns a share of the
//! transactions. A transaction opens a `RequestContext`, reads the fare
//! rules of one key and narrows them the way a pricing path would.

use crate::fixtures::{FareRule, FareRuleKey, FARE_RULE_CACHE};
use anyhow::Result;
use chrono::{Days, NaiveDate};
use farecache_core::{CacheRegistry, IsInhibited, Or, RequestContext, VendorMismatch};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transactions ticketed this many days in the past cycle through this window
const TICKET_WINDOW_DAYS: u64 = 720;

/// One transaction to replay
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: usize,
    pub key: FareRuleKey,
    pub ticket_date: NaiveDate,
    pub travel_date: NaiveDate,
}

/// Deterministic transaction mix over `keys`: every third transaction is
/// ticketed in the past, the rest today
pub fn plan(keys: &[FareRuleKey], count: usize, today: NaiveDate) -> Vec<Transaction> {
    if keys.is_empty() {
        return Vec::new();
    }

    (0..count)
        .map(|id| {
            let key = keys[(id * 7919) % keys.len()].clone();
            let ticket_date = if id % 3 == 0 {
                let back = (id as u64 * 37) % TICKET_WINDOW_DAYS + 1;
                today.checked_sub_days(Days::new(back)).unwrap_or(today)
            } else {
                today
            };
            let travel_date = ticket_date
                .checked_add_days(Days::new((id % 60) as u64))
                .unwrap_or(ticket_date);
            Transaction {
                id,
                key,
                ticket_date,
                travel_date,
            }
        })
        .collect()
}

/// Totals of one worker, or of the whole pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub transactions: usize,
    pub historical: usize,
    pub records_priced: usize,
    pub failures: usize,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.transactions += other.transactions;
        self.historical += other.historical;
        self.records_priced += other.records_priced;
        self.failures += other.failures;
    }
}

/// Fixed set of blocking workers over a shared registry
pub struct WorkerPool {
    registry: Arc<CacheRegistry>,
    workers: usize,
    today: NaiveDate,
}

impl WorkerPool {
    pub fn new(registry: Arc<CacheRegistry>, workers: usize, today: NaiveDate) -> Self {
        Self {
            registry,
            workers: workers.max(1),
            today,
        }
    }

    /// Run every transaction; worker `w` takes transactions `w, w + n, ...`
    pub async fn run(&self, transactions: Vec<Transaction>) -> Result<WorkerReport> {
        let transactions = Arc::new(transactions);
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let registry = Arc::clone(&self.registry);
            let transactions = Arc::clone(&transactions);
            let (workers, today) = (self.workers, self.today);

            handles.push(tokio::task::spawn_blocking(move || {
                let mut report = WorkerReport::default();
                for trx in transactions.iter().skip(worker_id).step_by(workers) {
                    report.merge(run_transaction(&registry, trx, today));
                }
                debug!(worker_id, transactions = report.transactions, "Worker finished");
                report
            }));
        }

        let mut total = WorkerReport::default();
        for handle in handles {
            total.merge(handle.await?);
        }

        info!(
            transactions = total.transactions,
            historical = total.historical,
            records_priced = total.records_priced,
            failures = total.failures,
            "Replay finished"
        );
        Ok(total)
    }
}

fn run_transaction(registry: &CacheRegistry, trx: &Transaction, today: NaiveDate) -> WorkerReport {
    let ctx = RequestContext::new(registry, trx.ticket_date, today);
    let _span = ctx.span().entered();

    let mut report = WorkerReport {
        transactions: 1,
        historical: usize::from(ctx.is_historical()),
        ..Default::default()
    };

    let effective = match ctx.fetch_effective::<FareRuleKey, FareRule>(
        FARE_RULE_CACHE,
        &trx.key,
        trx.travel_date,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(trx = trx.id, key = ?trx.key, "Transaction failed: {}", e);
            report.failures = 1;
            return report;
        }
    };

    let priceable = farecache_core::apply_filter(
        ctx.delete_list(),
        &effective,
        Or(IsInhibited::for_pricing(), VendorMismatch::new(trx.key.vendor.as_str())),
    );
    report.records_priced = priceable.len();
    report
}
