use std::path::PathBuf;
use std::time::Duration;

/// Typed runtime configuration, loaded once at startup from the
/// environment (plus `.env` in development).
#[derive(Clone, Debug)]
pub struct Config {
    pub app_env: String,
    pub database_url: String,

    pub http_port: u16,
    pub metrics_port: u16,

    pub workers_count: usize,
    pub poll_interval: Duration,
    pub dispatch_batch_size: i64,

    pub reap_interval: Duration,
    pub max_job_run: Duration,

    pub migrate_on_startup: bool,

    // handler credentials, opaque to the core
    pub resend_from_email: String,
    pub blob_root: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let app_env = env_or("APP_ENV", "development");

        let database_url =
            std::env::var("PG_DB_URL").map_err(|_| anyhow::anyhow!("PG_DB_URL is required"))?;
        if database_url.trim().is_empty() {
            anyhow::bail!("PG_DB_URL is required");
        }

        let cfg = Self {
            app_env: app_env.clone(),
            database_url,
            http_port: env_as("HTTP_PORT", 8080),
            metrics_port: env_as("METRICS_PORT", 9090),
            workers_count: env_as("WORKERS_COUNT", 5_usize).max(1),
            poll_interval: Duration::from_secs(env_as("POLL_INTERVAL_SECONDS", 2_u64).max(1)),
            dispatch_batch_size: env_as("DISPATCH_BATCH_SIZE", 10_i64).clamp(1, 1000),
            reap_interval: Duration::from_secs(env_as("REAP_INTERVAL_SECONDS", 30_u64).max(1)),
            max_job_run: Duration::from_secs(env_as("MAX_JOB_RUN_SECONDS", 1800_u64).max(1)),
            migrate_on_startup: env_as_bool("MIGRATE_ON_STARTUP", true),
            resend_from_email: env_or("RESEND_FROM_EMAIL", "jobs@localhost"),
            blob_root: PathBuf::from(env_or("BLOB_ROOT", "./blob-data")),
        };

        if cfg.app_env == "production" && cfg.resend_from_email == "jobs@localhost" {
            anyhow::bail!("RESEND_FROM_EMAIL must be set explicitly in production");
        }

        Ok(cfg)
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn env_as<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_as_bool(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}
