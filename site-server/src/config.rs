//! Site server configuration

use std::collections::HashMap;
use std::time::Duration;

use shared::models::{Courier, GatewayKind};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which storage backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    MySql,
    Memory,
}

/// Public URLs the server hands out to gateways and browsers
#[derive(Debug, Clone)]
pub struct BaseUrls {
    /// Root for callback URLs, e.g. `https://api.example.com`
    pub public: String,
    /// Landing page of the in-process virtual gateway
    pub virtual_gateway: String,
}

/// Site server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// MySQL connection URL
    pub db_main_dsn: String,
    pub storage: StorageKind,
    /// Redis URL; unset means in-process cache
    pub redis_main_addr: Option<String>,
    /// AMQP URL; unset means in-process event bus
    pub broker_addr: Option<String>,
    pub broker_exchange: String,
    /// Per-gateway API base URL overrides (`GATEWAY_<KIND>_BASE_URL`)
    pub gateway_base_urls: HashMap<GatewayKind, String>,
    pub gateway_timeout: Duration,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub site_default_currency: String,
    pub base_urls: BaseUrls,
    pub http_port: u16,
    pub courier_post_price: i64,
    pub courier_tipax_price: i64,
    /// AwaitingPayment orders older than this are abandoned by the sweep
    pub payment_timeout: Duration,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    /// Environment: development | staging | production
    pub environment: String,
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    fn var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, BoxError> {
        match std::env::var(name) {
            Ok(v) if !v.is_empty() => v
                .parse()
                .map_err(|_| format!("{name} has an invalid value: {v}").into()),
            _ => Ok(default),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let storage = match std::env::var("STORAGE").as_deref() {
            Ok("memory") => StorageKind::Memory,
            Ok("mysql") | Err(_) => StorageKind::MySql,
            Ok(other) => return Err(format!("STORAGE must be mysql or memory, got {other}").into()),
        };
        let db_main_dsn = match std::env::var("DATABASE_URL") {
            Ok(v) => v,
            Err(_) if storage == StorageKind::Memory => String::new(),
            Err(_) => return Err("DATABASE_URL must be set".into()),
        };

        let mut gateway_base_urls = HashMap::new();
        for kind in GatewayKind::ALL {
            let name = format!("GATEWAY_{}_BASE_URL", kind.as_str().to_uppercase());
            if let Ok(url) = std::env::var(&name) {
                gateway_base_urls.insert(kind, url.trim_end_matches('/').to_string());
            }
        }

        let public = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();
        let virtual_gateway = std::env::var("VIRTUAL_GATEWAY_URL")
            .unwrap_or_else(|_| format!("{public}/payment/virtual"));

        Ok(Self {
            db_main_dsn,
            storage,
            redis_main_addr: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            broker_addr: std::env::var("BROKER_URL").ok().filter(|s| !s.is_empty()),
            broker_exchange: std::env::var("BROKER_EXCHANGE")
                .unwrap_or_else(|_| "site_builder.events".into()),
            gateway_base_urls,
            gateway_timeout: Duration::from_secs(Self::var_or("GATEWAY_TIMEOUT_SECS", 15)?),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            jwt_ttl: Duration::from_secs(Self::var_or::<u64>("JWT_TTL_HOURS", 24)? * 3600),
            site_default_currency: std::env::var("SITE_DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "IRR".into()),
            base_urls: BaseUrls {
                public,
                virtual_gateway,
            },
            http_port: Self::var_or("HTTP_PORT", 8080)?,
            courier_post_price: Self::var_or("COURIER_POST_PRICE", 100_000)?,
            courier_tipax_price: Self::var_or("COURIER_TIPAX_PRICE", 100_000)?,
            payment_timeout: Duration::from_secs(
                Self::var_or::<u64>("PAYMENT_TIMEOUT_MINUTES", 30)? * 60,
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: Self::var_or("LOG_JSON", environment == "production")?,
            log_dir: std::env::var("LOG_DIR").ok().filter(|s| !s.is_empty()),
            environment,
        })
    }

    /// Defaults for tests and local runs against the in-memory store
    pub fn for_tests() -> Self {
        Self {
            db_main_dsn: String::new(),
            storage: StorageKind::Memory,
            redis_main_addr: None,
            broker_addr: None,
            broker_exchange: "site_builder.events".into(),
            gateway_base_urls: HashMap::new(),
            gateway_timeout: Duration::from_secs(5),
            jwt_secret: "test-secret".into(),
            jwt_ttl: Duration::from_secs(3600),
            site_default_currency: "IRR".into(),
            base_urls: BaseUrls {
                public: "http://localhost:8080".into(),
                virtual_gateway: "http://localhost:8080/payment/virtual".into(),
            },
            http_port: 0,
            courier_post_price: 100_000,
            courier_tipax_price: 100_000,
            payment_timeout: Duration::from_secs(30 * 60),
            log_level: "debug".into(),
            log_json: false,
            log_dir: None,
            environment: "development".into(),
        }
    }

    pub fn courier_price(&self, courier: Courier) -> i64 {
        match courier {
            Courier::Post => self.courier_post_price,
            Courier::Tipax => self.courier_tipax_price,
        }
    }

    /// Callback URL handed to the gateway for one payment
    pub fn callback_url(&self, flow: &str, tracking_number: i64) -> String {
        format!(
            "{}/payment/callback/{flow}?tracking_number={tracking_number}",
            self.base_urls.public
        )
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_carries_tracking_number() {
        let config = Config::for_tests();
        assert_eq!(
            config.callback_url("create_order_verify", 42),
            "http://localhost:8080/payment/callback/create_order_verify?tracking_number=42"
        );
    }

    #[test]
    fn courier_prices_come_from_config() {
        let mut config = Config::for_tests();
        config.courier_tipax_price = 250_000;
        assert_eq!(config.courier_price(Courier::Post), 100_000);
        assert_eq!(config.courier_price(Courier::Tipax), 250_000);
    }
}
