//! Basket Pricing
//!
//! Coupons per product, one site discount code per basket, stock flags.
//! Decrements happen only when a paid order is committed.

mod calculator;
mod engine;

pub use calculator::*;
pub use engine::*;
