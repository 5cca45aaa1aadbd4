use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, MySql, MySqlPool, QueryBuilder, Transaction};

use super::allocation_repository::{AllocationRepository, AllocationUnitOfWork, Lookup};
use crate::core::{AppError, Result};
use crate::modules::allocations::models::{
    AllocationFilter, AllocationStrategy, InvoiceOrdering, NewAllocation, PaymentAllocation,
};
use crate::modules::invoices::Invoice;
use crate::modules::payments::{Payment, PaymentStatus};

macro_rules! payment_fields {
    () => {
        "p.id, p.company_id, p.customer_id, p.payment_number, p.currency, p.amount, \
         p.status, p.payment_date, p.created_at"
    };
}

macro_rules! invoice_fields {
    () => {
        "i.id, i.company_id, i.customer_id, i.invoice_number, i.currency, i.total_amount, \
         i.status, i.issue_date, i.due_date, i.created_at"
    };
}

const PAYMENT_FIELDS: &str = payment_fields!();

const INVOICE_FIELDS: &str = invoice_fields!();

const PAYMENT_COLUMNS: &str = concat!(
    payment_fields!(),
    ", COALESCE((SELECT SUM(a.allocated_amount) FROM payment_allocations a \
     WHERE a.payment_id = p.id AND a.reversed_at IS NULL), 0) AS total_allocated"
);

const INVOICE_COLUMNS: &str = concat!(
    invoice_fields!(),
    ", COALESCE((SELECT SUM(a.allocated_amount) FROM payment_allocations a \
     WHERE a.invoice_id = i.id AND a.reversed_at IS NULL), 0) AS total_allocated"
);

const ALLOCATION_COLUMNS: &str = r#"
    pa.id, pa.company_id, pa.payment_id, pa.invoice_id, pa.allocated_amount,
    pa.allocation_date, pa.allocation_method, pa.allocation_strategy, pa.notes,
    pa.created_by, pa.created_at, pa.reversed_at, pa.reversal_reason, pa.reversed_by
"#;

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: i64,
    company_id: i64,
    customer_id: i64,
    payment_number: String,
    currency: String,
    amount: Decimal,
    status: String,
    payment_date: NaiveDate,
    created_at: DateTime<Utc>,
    #[sqlx(default)]
    total_allocated: Decimal,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Payment {
            id: row.id,
            company_id: row.company_id,
            customer_id: row.customer_id,
            payment_number: row.payment_number,
            currency: row.currency.parse().map_err(AppError::Internal)?,
            amount: row.amount,
            status: row.status.parse().map_err(AppError::Internal)?,
            payment_date: row.payment_date,
            created_at: row.created_at,
            total_allocated: row.total_allocated,
        })
    }
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: i64,
    company_id: i64,
    customer_id: i64,
    invoice_number: String,
    currency: String,
    total_amount: Decimal,
    status: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    created_at: DateTime<Utc>,
    #[sqlx(default)]
    total_allocated: Decimal,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self> {
        Ok(Invoice {
            id: row.id,
            company_id: row.company_id,
            customer_id: row.customer_id,
            invoice_number: row.invoice_number,
            currency: row.currency.parse().map_err(AppError::Internal)?,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(AppError::Internal)?,
            issue_date: row.issue_date,
            due_date: row.due_date,
            created_at: row.created_at,
            total_allocated: row.total_allocated,
        })
    }
}

#[derive(Debug, FromRow)]
struct AllocationRow {
    id: i64,
    company_id: i64,
    payment_id: i64,
    invoice_id: i64,
    allocated_amount: Decimal,
    allocation_date: NaiveDate,
    allocation_method: String,
    allocation_strategy: Option<String>,
    notes: Option<String>,
    created_by: i64,
    created_at: DateTime<Utc>,
    reversed_at: Option<DateTime<Utc>>,
    reversal_reason: Option<String>,
    reversed_by: Option<i64>,
}

impl TryFrom<AllocationRow> for PaymentAllocation {
    type Error = AppError;

    fn try_from(row: AllocationRow) -> Result<Self> {
        let allocation_strategy = row
            .allocation_strategy
            .map(|s| s.parse::<AllocationStrategy>())
            .transpose()
            .map_err(AppError::Internal)?;

        Ok(PaymentAllocation {
            id: row.id,
            company_id: row.company_id,
            payment_id: row.payment_id,
            invoice_id: row.invoice_id,
            allocated_amount: row.allocated_amount,
            allocation_date: row.allocation_date,
            allocation_method: row.allocation_method.parse().map_err(AppError::Internal)?,
            allocation_strategy,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            reversed_at: row.reversed_at,
            reversal_reason: row.reversal_reason,
            reversed_by: row.reversed_by,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// MySQL implementation of the allocation port
pub struct MySqlAllocationRepository {
    pool: MySqlPool,
}

impl MySqlAllocationRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl AllocationRepository for MySqlAllocationRepository {
    async fn begin(&self) -> Result<Box<dyn AllocationUnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlUnitOfWork { tx }))
    }

    async fn find_payment(&self, company_id: i64, payment_id: i64) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments p WHERE p.company_id = ? AND p.id = ?",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(company_id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn find_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices i WHERE i.company_id = ? AND i.id = ?",
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(company_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Invoice::try_from).transpose()
    }

    async fn find_allocation(
        &self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>> {
        let sql = format!(
            "SELECT {} FROM payment_allocations pa WHERE pa.company_id = ? AND pa.id = ?",
            ALLOCATION_COLUMNS
        );
        let row = sqlx::query_as::<_, AllocationRow>(&sql)
            .bind(company_id)
            .bind(allocation_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PaymentAllocation::try_from).transpose()
    }

    async fn find_allocations(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
    ) -> Result<Vec<PaymentAllocation>> {
        if allocation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(format!(
            "SELECT {} FROM payment_allocations pa WHERE pa.company_id = ",
            ALLOCATION_COLUMNS
        ));
        builder.push_bind(company_id);
        builder.push(" AND pa.id IN (");
        let mut ids = builder.separated(", ");
        for id in allocation_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(") ORDER BY pa.id");

        let rows = builder
            .build_query_as::<AllocationRow>()
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn list_allocations(
        &self,
        company_id: i64,
        filter: &AllocationFilter,
    ) -> Result<Vec<PaymentAllocation>> {
        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(format!(
            "SELECT {} FROM payment_allocations pa \
             JOIN invoices i ON i.id = pa.invoice_id \
             WHERE pa.company_id = ",
            ALLOCATION_COLUMNS
        ));
        builder.push_bind(company_id);

        if filter.reversed_only {
            builder.push(" AND pa.reversed_at IS NOT NULL");
        } else if !filter.include_reversed {
            builder.push(" AND pa.reversed_at IS NULL");
        }
        if let Some(payment_id) = filter.payment_id {
            builder.push(" AND pa.payment_id = ").push_bind(payment_id);
        }
        if let Some(invoice_id) = filter.invoice_id {
            builder.push(" AND pa.invoice_id = ").push_bind(invoice_id);
        }
        if let Some(customer_id) = filter.customer_id {
            builder.push(" AND i.customer_id = ").push_bind(customer_id);
        }
        if let Some(from) = filter.from {
            builder.push(" AND pa.allocation_date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND pa.allocation_date <= ").push_bind(to);
        }
        builder.push(" ORDER BY pa.id");

        let rows = builder
            .build_query_as::<AllocationRow>()
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn list_open_invoices(
        &self,
        company_id: i64,
        customer_id: i64,
        ordering: InvoiceOrdering,
    ) -> Result<Vec<Invoice>> {
        let order_by = match ordering {
            InvoiceOrdering::DueDateAsc => "t.due_date ASC, t.id ASC",
            InvoiceOrdering::BalanceDesc => "(t.total_amount - t.total_allocated) DESC, t.id ASC",
        };
        let sql = format!(
            "SELECT * FROM ( \
                SELECT {} FROM invoices i \
                WHERE i.company_id = ? AND i.customer_id = ? \
                  AND i.status NOT IN ('paid', 'cancelled') \
             ) t \
             WHERE t.total_amount - t.total_allocated > 0 \
             ORDER BY {}",
            INVOICE_COLUMNS, order_by
        );

        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(company_id)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn list_invoices(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
    ) -> Result<Vec<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices i \
             WHERE i.company_id = ? AND (? IS NULL OR i.customer_id = ?) \
             ORDER BY i.due_date, i.id",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(company_id)
            .bind(customer_id)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn list_payments(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
    ) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments p \
             WHERE p.company_id = ? AND (? IS NULL OR p.customer_id = ?) \
             ORDER BY p.payment_date, p.id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(company_id)
            .bind(customer_id)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }
}

/// A database transaction holding `FOR UPDATE` locks
pub struct MySqlUnitOfWork {
    tx: Transaction<'static, MySql>,
}

impl MySqlUnitOfWork {
    /// Sum of active allocations against a locked payment or invoice.
    ///
    /// Issued as its own locking read after the parent row lock is held, so it
    /// sees the latest committed allocations rather than the transaction's
    /// REPEATABLE READ snapshot.
    async fn locked_total(&mut self, parent: &'static str, id: i64) -> Result<Decimal> {
        let sql = format!(
            "SELECT COALESCE(SUM(allocated_amount), 0) FROM payment_allocations \
             WHERE {} = ? AND reversed_at IS NULL FOR SHARE",
            parent
        );
        let total: Decimal = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(total)
    }
}

#[async_trait]
impl AllocationUnitOfWork for MySqlUnitOfWork {
    async fn lock_payment(&mut self, company_id: i64, payment_id: i64) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments p WHERE p.company_id = ? AND p.id = ? FOR UPDATE",
            PAYMENT_FIELDS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(company_id)
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(mut row) = row else {
            return Ok(None);
        };
        row.total_allocated = self.locked_total("payment_id", payment_id).await?;
        Payment::try_from(row).map(Some)
    }

    async fn lock_invoice(&mut self, company_id: i64, invoice_id: i64) -> Result<Lookup<Invoice>> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT company_id FROM invoices WHERE id = ?")
            .bind(invoice_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        match owner {
            None => return Ok(Lookup::Missing),
            Some(owner) if owner != company_id => return Ok(Lookup::ForeignTenant),
            Some(_) => {}
        }

        let sql = format!(
            "SELECT {} FROM invoices i WHERE i.company_id = ? AND i.id = ? FOR UPDATE",
            INVOICE_FIELDS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(company_id)
            .bind(invoice_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(mut row) = row else {
            return Ok(Lookup::Missing);
        };
        row.total_allocated = self.locked_total("invoice_id", invoice_id).await?;
        Ok(Lookup::Found(Invoice::try_from(row)?))
    }

    async fn lock_allocation(
        &mut self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>> {
        let sql = format!(
            "SELECT {} FROM payment_allocations pa \
             WHERE pa.company_id = ? AND pa.id = ? FOR UPDATE",
            ALLOCATION_COLUMNS
        );
        let row = sqlx::query_as::<_, AllocationRow>(&sql)
            .bind(company_id)
            .bind(allocation_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(PaymentAllocation::try_from).transpose()
    }

    async fn insert_allocation(&mut self, allocation: &NewAllocation) -> Result<PaymentAllocation> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_allocations (
                company_id, payment_id, invoice_id, allocated_amount, allocation_date,
                allocation_method, allocation_strategy, notes, created_by
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(allocation.company_id)
        .bind(allocation.payment_id)
        .bind(allocation.invoice_id)
        .bind(allocation.allocated_amount)
        .bind(allocation.allocation_date)
        .bind(allocation.allocation_method.to_string())
        .bind(allocation.allocation_strategy.map(|s| s.to_string()))
        .bind(&allocation.notes)
        .bind(allocation.created_by)
        .execute(&mut *self.tx)
        .await?;

        let id = result.last_insert_id() as i64;
        self.lock_allocation(allocation.company_id, id)
            .await?
            .ok_or_else(|| AppError::internal("Allocation was created but not found"))
    }

    async fn mark_allocation_reversed(
        &mut self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        reversed_by: i64,
        reversed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_allocations
            SET reversed_at = ?, reversal_reason = ?, reversed_by = ?
            WHERE company_id = ? AND id = ? AND reversed_at IS NULL
            "#,
        )
        .bind(reversed_at)
        .bind(reason)
        .bind(reversed_by)
        .bind(company_id)
        .bind(allocation_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_payment_status(
        &mut self,
        company_id: i64,
        payment_id: i64,
        status: PaymentStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments SET status = ?, updated_at = CURRENT_TIMESTAMP
            WHERE company_id = ? AND id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(company_id)
        .bind(payment_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
