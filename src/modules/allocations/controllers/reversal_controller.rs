use std::sync::Arc;

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::{Actor, AppError};
use crate::modules::allocations::services::PaymentAllocationReversalService;

#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReverseBatchRequest {
    pub allocation_ids: Vec<i64>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReverseInvoiceRequest {
    pub reason: String,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
}

/// Body of the read-only reversal endpoints
#[derive(Debug, Deserialize)]
pub struct AllocationIdsRequest {
    pub allocation_ids: Vec<i64>,
}

/// POST /reversals/allocations/{id}
pub async fn reverse_allocation(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<ReverseRequest>,
) -> Result<HttpResponse, AppError> {
    let receipt = service
        .reverse_single(actor.company_id, path.into_inner(), &request.reason, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(receipt))
}

/// POST /reversals/batch
pub async fn reverse_batch(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    request: web::Json<ReverseBatchRequest>,
) -> Result<HttpResponse, AppError> {
    let result = service
        .reverse_batch(
            actor.company_id,
            &request.allocation_ids,
            &request.reason,
            &actor,
        )
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// POST /reversals/payments/{id}
pub async fn reverse_payment(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<ReverseRequest>,
) -> Result<HttpResponse, AppError> {
    let result = service
        .reverse_all_for_payment(actor.company_id, path.into_inner(), &request.reason, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// POST /reversals/invoices/{id}
pub async fn reverse_invoice(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<ReverseInvoiceRequest>,
) -> Result<HttpResponse, AppError> {
    let result = service
        .reverse_for_invoice(
            actor.company_id,
            path.into_inner(),
            &request.reason,
            &actor,
            request.max_amount,
        )
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// POST /reversals/validate
pub async fn validate_reversal(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    request: web::Json<AllocationIdsRequest>,
) -> Result<HttpResponse, AppError> {
    let validation = service
        .validate_reversal(actor.company_id, &request.allocation_ids, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(validation))
}

/// POST /reversals/impact
pub async fn reversal_impact(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    request: web::Json<AllocationIdsRequest>,
) -> Result<HttpResponse, AppError> {
    let impact = service
        .get_reversal_impact(actor.company_id, &request.allocation_ids, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(impact))
}

/// POST /reversals/history
pub async fn reversal_history(
    service: web::Data<Arc<PaymentAllocationReversalService>>,
    actor: Actor,
    request: web::Json<AllocationIdsRequest>,
) -> Result<HttpResponse, AppError> {
    let history = service
        .get_reversal_history(actor.company_id, &request.allocation_ids, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(history))
}

/// Configure reversal routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reversals")
            .route("/allocations/{id}", web::post().to(reverse_allocation))
            .route("/batch", web::post().to(reverse_batch))
            .route("/payments/{id}", web::post().to(reverse_payment))
            .route("/invoices/{id}", web::post().to(reverse_invoice))
            .route("/validate", web::post().to(validate_reversal))
            .route("/impact", web::post().to(reversal_impact))
            .route("/history", web::post().to(reversal_history)),
    );
}
