//! Logging Infrastructure
//!
//! - Console output: pretty in development, JSON in production
//! - Optional file output under `LOG_DIR`:
//!   - `app/`      daily rotated, deleted after 14 days
//!   - `audit/`    payment reconciliation trail, never deleted
//!   - `security/` auth failures, never deleted

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Filter, Layered};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, fmt, prelude::*};

type Subscriber = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Subscriber> + Send + Sync>;

const APP_LOG_RETENTION_DAYS: i64 = 14;

/// Default directives when `RUST_LOG` is not set
fn default_directives(level: &str) -> String {
    format!("site_server={level},shared={level},tower_http={level},audit=info,security=info")
}

fn text_layer<W, F>(json: bool, ansi: bool, writer: W, filter: F) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: Filter<Subscriber> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer);
    if json {
        base.json()
            .with_current_span(true)
            .with_thread_ids(true)
            .with_filter(filter)
            .boxed()
    } else {
        base.with_ansi(ansi).with_filter(filter).boxed()
    }
}

fn file_layers(log_dir: &Path, json: bool) -> anyhow::Result<Vec<BoxedLayer>> {
    let mut layers = Vec::with_capacity(3);
    for (name, is_app) in [("app", true), ("audit", false), ("security", false)] {
        let dir = log_dir.join(name);
        fs::create_dir_all(&dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
        let writer = std::sync::Mutex::new(appender);
        let layer = if is_app {
            text_layer(
                json,
                false,
                writer,
                filter::filter_fn(|meta| meta.target() != "audit" && meta.target() != "security"),
            )
        } else {
            text_layer(
                json,
                false,
                writer,
                filter::filter_fn(move |meta| meta.target() == name),
            )
        };
        layers.push(layer);
    }
    Ok(layers)
}

/// Initialize the logging system
///
/// ```no_run
/// // Development: pretty console only
/// site_server::logger::init_logger_with_file("debug", false, None)?;
/// // Production: JSON console + rotated files
/// site_server::logger::init_logger_with_file("info", true, Some("./logs"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let mut layers = vec![text_layer(
        json_format,
        true,
        std::io::stdout,
        filter::LevelFilter::TRACE,
    )];

    if let Some(dir) = log_dir {
        let dir = Path::new(dir);
        fs::create_dir_all(dir)?;
        layers.extend(file_layers(dir, json_format)?);
        tokio::spawn(periodic_cleanup(dir.to_path_buf()));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;
    Ok(())
}

/// Delete `app/app.YYYY-MM-DD` files older than the retention window
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<()> {
    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(());
    }
    let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);

    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date) = name
            .strip_prefix("app.")
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if date < cutoff {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }
    Ok(())
}

async fn periodic_cleanup(log_dir: PathBuf) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
    loop {
        interval.tick().await;
        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}

/// Audit log helper for money-affecting events that need a human
///
/// ```no_run
/// site_server::audit_log!("payment:1234", "needs_reconciliation", "stock commit failed");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($resource:expr, $action:expr, $details:expr) => {
        tracing::error!(
            target: "audit",
            resource = $resource,
            action = $action,
            details = $details,
            timestamp = chrono::Utc::now().to_rfc3339(),
            "AUDIT"
        );
    };
}

/// Security log helper
#[macro_export]
macro_rules! security_log {
    (WARN, $event:expr, $($arg:tt)*) => {
        tracing::warn!(target: "security", event = $event, $($arg)*);
    };
    (INFO, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: "security", event = $event, $($arg)*);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_removes_only_expired_app_logs() {
        let dir = std::env::temp_dir().join(format!("site-server-logs-{}", uuid::Uuid::new_v4()));
        let app = dir.join("app");
        fs::create_dir_all(&app).unwrap();
        let today = chrono::Utc::now().date_naive();
        let old = today - chrono::Duration::days(30);
        let old_file = app.join(format!("app.{}", old.format("%Y-%m-%d")));
        let new_file = app.join(format!("app.{}", today.format("%Y-%m-%d")));
        fs::write(&old_file, "x").unwrap();
        fs::write(&new_file, "x").unwrap();

        cleanup_old_logs(&dir).unwrap();

        assert!(!old_file.exists());
        assert!(new_file.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
