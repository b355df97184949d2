pub mod admin;
pub mod admin_handlers;
pub mod app;
pub mod checkout_handlers;
pub mod config;
pub mod countdown;
pub mod discount;
pub mod gateway;
pub mod payment;
pub mod session;
pub mod totals;

pub use app::{build_router, AppState};
pub use config::CheckoutConfig;
