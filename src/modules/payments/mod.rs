// Payments module

pub mod models;

pub use models::{Payment, PaymentStatus};
