//! MySQL store
//!
//! Plain `sqlx::query` / `query_as` with `?` placeholders and private row
//! structs. Enum columns are stored as their snake_case names and parsed on
//! read; JSON-shaped columns are text.

mod catalog;
mod content;
mod orders;

use std::str::FromStr;
use std::time::Duration;

use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use super::{RepoError, RepoResult};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and apply pending migrations
    pub async fn connect(dsn: &str) -> Result<Self, BoxError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("MySQL connected, migrations applied");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Parse an enum column stored as text
fn parse_col<T>(value: &str, column: &str) -> RepoResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| RepoError::Database(format!("bad {column} column: {e}")))
}

/// `?, ?, ?` for an IN list of `n` values
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OrderStatus;

    #[test]
    fn in_list_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(1), "?");
    }

    #[test]
    fn enum_columns_parse_or_report_the_column() {
        let ok: OrderStatus = parse_col("awaiting_payment", "status").unwrap();
        assert_eq!(ok, OrderStatus::AwaitingPayment);
        let err = parse_col::<OrderStatus>("shipped", "status").unwrap_err();
        assert!(err.to_string().contains("status"));
    }
}
