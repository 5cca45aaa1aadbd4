pub mod actor;
pub mod currency;
pub mod error;
pub mod retry;

pub use actor::{Actor, Permission, Role};
pub use currency::Currency;
pub use error::{AppError, Result};
pub use retry::retry_on_conflict;
