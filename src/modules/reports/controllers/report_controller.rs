use std::sync::Arc;

use actix_web::{http::header, web, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::core::{Actor, AppError, Result};
use crate::modules::allocations::models::{AllocationMethod, AllocationStrategy};
use crate::modules::reports::models::{ExportFilters, ExportFormat};
use crate::modules::reports::services::PaymentAllocationReportService;

/// Query parameters for period reports
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    /// Start date of reporting period (inclusive, format: YYYY-MM-DD)
    pub start_date: String,
    /// End date of reporting period (inclusive, format: YYYY-MM-DD)
    pub end_date: String,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub allocation_strategy: Option<AllocationStrategy>,
    #[serde(default)]
    pub allocation_method: Option<AllocationMethod>,
}

fn default_format() -> String {
    "csv".to_string()
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::validation(format!(
            "Invalid {} format: '{}'. Expected YYYY-MM-DD",
            field, value
        ))
    })
}

fn parse_period(query: &PeriodQuery) -> Result<(NaiveDate, NaiveDate)> {
    Ok((
        parse_date("start_date", &query.start_date)?,
        parse_date("end_date", &query.end_date)?,
    ))
}

/// GET /reports/daily
pub async fn get_daily_summary(
    service: web::Data<Arc<PaymentAllocationReportService>>,
    actor: Actor,
    query: web::Query<DailyQuery>,
) -> std::result::Result<HttpResponse, AppError> {
    let date = parse_date("date", &query.date)?;
    let report = service
        .generate_daily_summary(actor.company_id, date, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// GET /reports/customers/{id}
pub async fn get_customer_report(
    service: web::Data<Arc<PaymentAllocationReportService>>,
    actor: Actor,
    path: web::Path<i64>,
    query: web::Query<PeriodQuery>,
) -> std::result::Result<HttpResponse, AppError> {
    let (start_date, end_date) = parse_period(&query)?;
    let report = service
        .generate_customer_report(actor.company_id, path.into_inner(), start_date, end_date, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// GET /reports/allocations
pub async fn get_comprehensive_report(
    service: web::Data<Arc<PaymentAllocationReportService>>,
    actor: Actor,
    query: web::Query<PeriodQuery>,
) -> std::result::Result<HttpResponse, AppError> {
    let (start_date, end_date) = parse_period(&query)?;
    let report = service
        .generate_comprehensive_report(actor.company_id, start_date, end_date, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// GET /reports/allocations/export
pub async fn export_allocations(
    service: web::Data<Arc<PaymentAllocationReportService>>,
    actor: Actor,
    query: web::Query<ExportQuery>,
) -> std::result::Result<HttpResponse, AppError> {
    let start_date = parse_date("start_date", &query.start_date)?;
    let end_date = parse_date("end_date", &query.end_date)?;
    let format: ExportFormat = query.format.parse().map_err(AppError::validation)?;
    let filters = ExportFilters {
        customer_id: query.customer_id,
        allocation_strategy: query.allocation_strategy,
        allocation_method: query.allocation_method,
    };

    let export = service
        .export_allocations(actor.company_id, start_date, end_date, format, &filters, &actor)
        .await?;

    let filename = match export.format {
        ExportFormat::Csv => format!("allocations_{}_{}.csv", start_date, end_date),
        ExportFormat::Json => format!("allocations_{}_{}.json", start_date, end_date),
    };

    Ok(HttpResponse::Ok()
        .content_type(export.format.content_type())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(export.body))
}

/// Configure routes for reports module
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reports")
            .route("/daily", web::get().to(get_daily_summary))
            .route("/customers/{id}", web::get().to(get_customer_report))
            .route("/allocations", web::get().to(get_comprehensive_report))
            .route("/allocations/export", web::get().to(export_allocations)),
    );
}
