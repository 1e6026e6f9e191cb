//! site-server: storefront, checkout and payment backend of the site builder
//!
//! - pricing: basket pricing with coupons and site discounts
//! - orders: checkout, gateway callbacks, credit and plan payments
//! - usage: page ↔ entity usage graph
//! - api: axum routers over all of the above

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod events;
pub mod gateway;
pub mod logger;
pub mod orders;
pub mod pricing;
pub mod state;
pub mod usage;

pub use config::Config;
pub use state::AppState;
