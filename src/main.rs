use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payalloc::allocations::{
    AllocationRepository, MySqlAllocationRepository, PaymentAllocationReversalService,
    PaymentAllocationService,
};
use payalloc::audit::{AuditSink, MySqlAuditSink, TracingAuditSink};
use payalloc::balances::{BalanceCache, BalanceTrackingService};
use payalloc::config::Config;
use payalloc::middleware::{
    json_error_handler, query_error_handler, ApiKeyAuth, ApiKeyStore, MySqlApiKeyStore,
    RateLimiter, RequestId,
};
use payalloc::modules::{configure_api, health};
use payalloc::reports::PaymentAllocationReportService;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("payalloc={},actix_web=info,sqlx=warn", config.app.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.app.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    init_tracing(&config);

    tracing::info!("Starting payment allocation engine");
    tracing::info!("Environment: {}", config.app.env);
    tracing::info!("Server binding to: {}", config.server.bind_address());

    let db_pool = config
        .database
        .create_pool()
        .await
        .context("Failed to create database pool")?;

    tracing::info!(
        "Database pool initialized ({} connections)",
        config.database.pool_size
    );

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    let repo: Arc<dyn AllocationRepository> =
        Arc::new(MySqlAllocationRepository::new(db_pool.clone()));
    let audit: Arc<dyn AuditSink> = match config.app.audit_sink.as_str() {
        "log" => Arc::new(TracingAuditSink),
        _ => Arc::new(MySqlAuditSink::new(db_pool.clone())),
    };
    let api_keys: Arc<dyn ApiKeyStore> = Arc::new(MySqlApiKeyStore::new(db_pool.clone()));
    let balance_cache = Arc::new(BalanceCache::new(
        config.allocation.customer_balance_ttl(),
        config.allocation.company_overview_ttl(),
    ));

    let allocation_service = web::Data::new(Arc::new(PaymentAllocationService::new(
        repo.clone(),
        audit.clone(),
        balance_cache.clone(),
        config.allocation.clone(),
    )));
    let reversal_service = web::Data::new(Arc::new(PaymentAllocationReversalService::new(
        repo.clone(),
        audit.clone(),
        balance_cache.clone(),
        config.allocation.clone(),
    )));
    let balance_service = web::Data::new(Arc::new(BalanceTrackingService::new(
        repo.clone(),
        balance_cache.clone(),
    )));
    let report_service = web::Data::new(Arc::new(PaymentAllocationReportService::new(
        repo.clone(),
    )));

    let rate_limit = config.security.rate_limit_per_minute;
    let bind_address = config.server.bind_address();
    let pool_data = web::Data::new(db_pool);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(ApiKeyAuth::new(api_keys.clone()))
            .wrap(RateLimiter::new(rate_limit))
            .wrap(RequestId)
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .app_data(pool_data.clone())
            .app_data(allocation_service.clone())
            .app_data(reversal_service.clone())
            .app_data(balance_service.clone())
            .app_data(report_service.clone())
            .route("/", web::get().to(index))
            .configure(health::controllers::configure)
            .configure(configure_api)
    })
    .workers(config.server.workers)
    .bind(&bind_address)?
    .run();

    tracing::info!("Server started at http://{}", bind_address);

    server.await?;
    Ok(())
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "service": "Payment Allocation Engine",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
