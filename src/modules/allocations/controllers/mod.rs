pub mod allocation_controller;
pub mod reversal_controller;

pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    allocation_controller::configure(cfg);
    reversal_controller::configure(cfg);
}
