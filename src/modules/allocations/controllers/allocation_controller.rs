use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::core::{Actor, AppError};
use crate::modules::allocations::models::{
    AllocationInstruction, AllocationMethod, AllocationStrategy, StrategyOptions,
};
use crate::modules::allocations::services::PaymentAllocationService;

/// Body of a manual allocation batch
#[derive(Debug, Deserialize)]
pub struct AllocatePaymentRequest {
    pub allocations: Vec<AllocationInstruction>,
}

/// Body of a strategy run or preview
#[derive(Debug, Deserialize)]
pub struct ApplyStrategyRequest {
    pub strategy: AllocationStrategy,
    #[serde(flatten)]
    pub options: StrategyOptions,
}

/// Allocate a payment across invoices
/// POST /payments/{id}/allocations
pub async fn allocate_payment(
    service: web::Data<Arc<PaymentAllocationService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<AllocatePaymentRequest>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    let results = service
        .allocate_across_invoices(
            actor.company_id,
            payment_id,
            &request.allocations,
            &actor,
            AllocationMethod::Manual,
            None,
        )
        .await?;

    Ok(HttpResponse::Created().json(results))
}

/// Allocate the remaining amount with a strategy
/// POST /payments/{id}/allocations/strategy
pub async fn apply_strategy(
    service: web::Data<Arc<PaymentAllocationService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<ApplyStrategyRequest>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    let results = service
        .apply_strategy(
            actor.company_id,
            payment_id,
            request.strategy,
            &actor,
            &request.options,
        )
        .await?;

    Ok(HttpResponse::Ok().json(results))
}

/// Dry-run a strategy
/// POST /payments/{id}/allocations/preview
pub async fn preview_strategy(
    service: web::Data<Arc<PaymentAllocationService>>,
    actor: Actor,
    path: web::Path<i64>,
    request: web::Json<ApplyStrategyRequest>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    let preview = service
        .preview_strategy(
            actor.company_id,
            payment_id,
            request.strategy,
            &actor,
            &request.options,
        )
        .await?;

    Ok(HttpResponse::Ok().json(preview))
}

/// GET /payments/{id}/allocations
pub async fn get_payment_allocations(
    service: web::Data<Arc<PaymentAllocationService>>,
    actor: Actor,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    let summary = service
        .get_payment_allocation_summary(actor.company_id, payment_id, &actor)
        .await?;

    Ok(HttpResponse::Ok().json(summary))
}

/// GET /strategies
pub async fn list_strategies(
    service: web::Data<Arc<PaymentAllocationService>>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(service.get_available_strategies()))
}

/// Configure allocation routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route("/{id}/allocations", web::post().to(allocate_payment))
            .route("/{id}/allocations", web::get().to(get_payment_allocations))
            .route("/{id}/allocations/strategy", web::post().to(apply_strategy))
            .route("/{id}/allocations/preview", web::post().to(preview_strategy)),
    )
    .route("/strategies", web::get().to(list_strategies));
}
