//! 超时未支付订单清理

use std::time::Duration;

use shared::util::now_millis;
use tokio::task::JoinHandle;

use super::OrderManager;

/// Run [`OrderManager::sweep_abandoned`] every `every` until the runtime stops
pub fn spawn_abandonment_sweep(manager: OrderManager, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match manager.sweep_abandoned(now_millis()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(abandoned = n, "Abandonment sweep finished"),
                Err(e) => tracing::error!(error = %e, "Abandonment sweep failed"),
            }
        }
    })
}
