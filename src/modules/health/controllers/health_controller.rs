use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Readiness probe response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessChecks {
    /// "ok", "unavailable" or "not_configured" (in-memory storage)
    pub database: String,
}

/// GET /health - Liveness probe, no dependency checks
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /ready - Readiness probe; checks database connectivity when a pool is registered
pub async fn readiness_check(pool: Option<web::Data<MySqlPool>>) -> impl Responder {
    let database = match pool {
        None => "not_configured",
        Some(pool) => match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
            Ok(_) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Database readiness check failed");
                "unavailable"
            }
        },
    };

    let ready = database != "unavailable";
    let response = ReadinessResponse {
        ready,
        checks: ReadinessChecks {
            database: database.to_string(),
        },
    };

    if ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check));
}
