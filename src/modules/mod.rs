pub mod allocations;
pub mod audit;
pub mod balances;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod reports;

use actix_web::web;

/// Versioned business routes; probes are registered separately at the root
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(allocations::controllers::configure)
            .configure(balances::controllers::configure)
            .configure(reports::controllers::configure),
    );
}
