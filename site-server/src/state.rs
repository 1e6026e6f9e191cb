//! Application state for site-server
//!
//! Built once at startup; every handler gets a cheap clone.

use std::sync::Arc;

use crate::auth::JwtService;
use crate::cache::{MemoryCache, RedisCache, StockCache};
use crate::config::{Config, StorageKind};
use crate::db::{MemoryStore, MySqlStore, Stores};
use crate::events::{AmqpPublisher, BusPublisher, EventPublisher};
use crate::gateway::{GatewayAdapter, GatewayRouter, VirtualGateway};
use crate::orders::{BasketService, OrderManager};
use crate::usage::UsageGraph;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub orders: OrderManager,
    pub baskets: BasketService,
    pub usage: UsageGraph,
    pub stock_cache: Arc<dyn StockCache>,
    pub jwt: JwtService,
    /// Signs the links of the `/payment/virtual` landing page
    pub virtual_gateway: Arc<VirtualGateway>,
}

impl AppState {
    /// Connect storage, cache and broker as configured
    pub async fn new(config: Config) -> Result<Self, BoxError> {
        let stores = match config.storage {
            StorageKind::MySql => Stores::from_backend(Arc::new(MySqlStore::connect(&config.db_main_dsn).await?)),
            StorageKind::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Stores::from_backend(Arc::new(MemoryStore::new()))
            }
        };

        let stock_cache: Arc<dyn StockCache> = match &config.redis_main_addr {
            Some(addr) => Arc::new(RedisCache::connect(addr).await?),
            None => {
                tracing::info!("REDIS_MAIN_ADDR not set, using in-process stock cache");
                Arc::new(MemoryCache::new())
            }
        };

        let events: Arc<dyn EventPublisher> = match &config.broker_addr {
            Some(addr) => Arc::new(AmqpPublisher::connect(addr, &config.broker_exchange).await?),
            None => {
                tracing::info!("BROKER_ADDR not set, order events stay in-process");
                Arc::new(BusPublisher::new())
            }
        };

        let gateway = Arc::new(GatewayRouter::from_config(&config)?);
        Self::assemble(config, stores, gateway, events, stock_cache)
    }

    /// Wire components over already-built infrastructure (tests plug in their own)
    pub fn assemble(
        config: Config,
        stores: Stores,
        gateway: Arc<dyn GatewayAdapter>,
        events: Arc<dyn EventPublisher>,
        stock_cache: Arc<dyn StockCache>,
    ) -> Result<Self, BoxError> {
        let config = Arc::new(config);
        let orders = OrderManager::new(
            &stores,
            gateway,
            events,
            stock_cache.clone(),
            config.clone(),
        );
        let baskets = BasketService::new(stores.baskets.clone(), orders.pricing().clone());
        let usage = UsageGraph::new(stores.pages.clone());
        let jwt = JwtService::new(&config.jwt_secret, config.jwt_ttl);
        let virtual_gateway = Arc::new(VirtualGateway::new(
            config.base_urls.virtual_gateway.clone(),
            config.jwt_secret.as_bytes(),
        )?);

        Ok(Self {
            config,
            stores,
            orders,
            baskets,
            usage,
            stock_cache,
            jwt,
            virtual_gateway,
        })
    }
}
