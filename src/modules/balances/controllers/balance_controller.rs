use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::core::{Actor, AppError};
use crate::modules::balances::models::HistoryPeriod;
use crate::modules::balances::services::BalanceTrackingService;

#[derive(Debug, Deserialize)]
pub struct CustomerBalanceQuery {
    /// Bypass the cached summary
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct CacheQuery {
    #[serde(default)]
    pub customer_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AgingQuery {
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

/// Inclusive date range, format YYYY-MM-DD
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub period: HistoryPeriod,
}

/// GET /balances/customers/{id}
pub async fn get_customer_balance(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
    path: web::Path<i64>,
    query: web::Query<CustomerBalanceQuery>,
) -> Result<HttpResponse, AppError> {
    let summary = service
        .get_customer_balance_summary(actor.company_id, path.into_inner(), &actor, !query.refresh)
        .await?;

    Ok(HttpResponse::Ok().json(summary))
}

/// GET /balances/customers/{id}/history
pub async fn get_customer_history(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
    path: web::Path<i64>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let history = service
        .get_customer_balance_history(
            actor.company_id,
            path.into_inner(),
            query.start_date,
            query.end_date,
            query.period,
            &actor,
        )
        .await?;

    Ok(HttpResponse::Ok().json(history))
}

/// GET /balances/aging
pub async fn get_aging_report(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
    query: web::Query<AgingQuery>,
) -> Result<HttpResponse, AppError> {
    let report = service
        .get_aging_report(actor.company_id, query.customer_id, query.as_of, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// GET /balances/efficiency
pub async fn get_efficiency_metrics(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, AppError> {
    let metrics = service
        .get_allocation_efficiency_metrics(actor.company_id, query.start_date, query.end_date, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(metrics))
}

/// GET /balances/overview
pub async fn get_company_overview(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
) -> Result<HttpResponse, AppError> {
    let overview = service
        .get_company_balance_overview(actor.company_id, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(overview))
}

/// DELETE /balances/cache
pub async fn clear_cache(
    service: web::Data<Arc<BalanceTrackingService>>,
    actor: Actor,
    query: web::Query<CacheQuery>,
) -> Result<HttpResponse, AppError> {
    service.clear_cache(actor.company_id, query.customer_id, &actor)?;
    Ok(HttpResponse::NoContent().finish())
}

/// Configure balance routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/balances")
            .route("/overview", web::get().to(get_company_overview))
            .route("/aging", web::get().to(get_aging_report))
            .route("/efficiency", web::get().to(get_efficiency_metrics))
            .route("/cache", web::delete().to(clear_cache))
            .route("/customers/{id}", web::get().to(get_customer_balance))
            .route("/customers/{id}/history", web::get().to(get_customer_history)),
    );
}
