use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::modules::balances::models::{CompanyBalanceOverview, CustomerBalanceSummary};

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.stored_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// TTL cache for balance read models, keyed per company and customer.
///
/// Every allocation and reversal invalidates the affected entries, so the
/// TTL only bounds staleness from writes made outside this process.
#[derive(Debug)]
pub struct BalanceCache {
    customers: DashMap<(i64, i64), Entry<CustomerBalanceSummary>>,
    overviews: DashMap<i64, Entry<CompanyBalanceOverview>>,
    customer_ttl: Duration,
    overview_ttl: Duration,
}

impl BalanceCache {
    pub fn new(customer_ttl: Duration, overview_ttl: Duration) -> Self {
        Self {
            customers: DashMap::new(),
            overviews: DashMap::new(),
            customer_ttl,
            overview_ttl,
        }
    }

    pub fn customer(&self, company_id: i64, customer_id: i64) -> Option<CustomerBalanceSummary> {
        let key = (company_id, customer_id);
        let hit = self
            .customers
            .get(&key)
            .and_then(|entry| entry.fresh(self.customer_ttl));
        if hit.is_none() {
            self.customers.remove(&key);
        }
        hit
    }

    pub fn store_customer(&self, summary: CustomerBalanceSummary) {
        self.customers.insert(
            (summary.company_id, summary.customer_id),
            Entry {
                value: summary,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn overview(&self, company_id: i64) -> Option<CompanyBalanceOverview> {
        let hit = self
            .overviews
            .get(&company_id)
            .and_then(|entry| entry.fresh(self.overview_ttl));
        if hit.is_none() {
            self.overviews.remove(&company_id);
        }
        hit
    }

    pub fn store_overview(&self, overview: CompanyBalanceOverview) {
        self.overviews.insert(
            overview.company_id,
            Entry {
                value: overview,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop one customer's entry (or every customer of the company) and the overview
    pub fn invalidate(&self, company_id: i64, customer_id: Option<i64>) {
        match customer_id {
            Some(customer_id) => {
                self.customers.remove(&(company_id, customer_id));
            }
            None => self
                .customers
                .retain(|(company, _), _| *company != company_id),
        }
        self.overviews.remove(&company_id);

        debug!(
            company_id = company_id,
            customer_id = ?customer_id,
            "Balance cache invalidated"
        );
    }
}
