//! Baskets, checkout and the payment lifecycle

mod basket;
pub mod manager;
mod sweep;

pub use basket::{BasketService, BasketUpdate, BasketView};
pub use manager::{
    CreditChargeRequest, CreditItem, LifecycleError, LifecycleResult, OrderManager, OrderRequest,
    PaymentRedirectView, PlanUpgradeRequest, VerifyResult, VerifyStatus,
};
pub use sweep::spawn_abandonment_sweep;
