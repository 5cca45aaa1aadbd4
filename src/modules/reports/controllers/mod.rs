mod report_controller;

// Re-export configure for main.rs
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    report_controller::configure(cfg);
}
