// MySQL fixtures for the adapter tests.
//
// Tests connect to `DATABASE_URL` and skip themselves when it is unset.
// Every test seeds under its own random company id, so runs share one
// database without truncating between tests.
//
// Usage:
//   #[path = "../helpers/test_database.rs"]
//   mod test_database;
//
//   let Some(pool) = test_database::connect().await else { return };

#![allow(dead_code)]

use chrono::NaiveDate;
use payalloc::config::DatabaseConfig;
use rust_decimal::Decimal;
use sqlx::MySqlPool;
use uuid::Uuid;

/// Pool on `DATABASE_URL` with migrations applied, `None` when unset
pub async fn connect() -> Option<MySqlPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping MySQL test");
        return None;
    };

    let config = DatabaseConfig {
        url,
        pool_size: 1,
        max_connections: 10,
        lock_wait_timeout_secs: 5,
    };
    let pool = config.create_pool().await.unwrap_or_else(|e| {
        panic!(
            "Failed to connect to test database: {}\n\n\
             Troubleshooting:\n\
             1. Ensure MySQL is running\n\
             2. Verify DATABASE_URL names an existing database\n\
             3. Check MySQL credentials and permissions",
            e
        )
    });

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

/// A company id no other test run has used
pub fn unique_company() -> i64 {
    (Uuid::new_v4().as_u128() >> 80) as i64 + 1_000
}

pub async fn insert_payment(
    pool: &MySqlPool,
    company_id: i64,
    customer_id: i64,
    payment_number: &str,
    amount: Decimal,
) -> i64 {
    sqlx::query(
        r#"
        INSERT INTO payments (company_id, customer_id, payment_number, currency, amount, status, payment_date)
        VALUES (?, ?, ?, 'USD', ?, 'pending', CURRENT_DATE)
        "#,
    )
    .bind(company_id)
    .bind(customer_id)
    .bind(payment_number)
    .bind(amount)
    .execute(pool)
    .await
    .expect("Failed to seed payment")
    .last_insert_id() as i64
}

pub async fn insert_invoice(
    pool: &MySqlPool,
    company_id: i64,
    customer_id: i64,
    invoice_number: &str,
    total: Decimal,
    due_date: NaiveDate,
) -> i64 {
    sqlx::query(
        r#"
        INSERT INTO invoices (company_id, customer_id, invoice_number, currency, total_amount, status, issue_date, due_date)
        VALUES (?, ?, ?, 'USD', ?, 'posted', ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(customer_id)
    .bind(invoice_number)
    .bind(total)
    .bind(due_date)
    .bind(due_date)
    .execute(pool)
    .await
    .expect("Failed to seed invoice")
    .last_insert_id() as i64
}

/// Active allocation total for an invoice, read straight from the table
pub async fn invoice_allocated(pool: &MySqlPool, invoice_id: i64) -> Decimal {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(allocated_amount), 0) FROM payment_allocations \
         WHERE invoice_id = ? AND reversed_at IS NULL",
    )
    .bind(invoice_id)
    .fetch_one(pool)
    .await
    .expect("Failed to sum allocations")
}
