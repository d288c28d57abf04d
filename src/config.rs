// src/config.rs

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the service runs on the
    /// in-memory store and loses all state on restart.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    /// How often the deadline poller scans for due jobs.
    pub scheduler_poll_interval: Duration,
    /// Maximum number of jobs claimed per scan.
    pub scheduler_batch_size: i64,
    /// Age after which a claimed but unresolved job is taken over by
    /// another poll.
    pub scheduler_claim_lease: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5),
            jwt_secret,
            rust_log,
            bind_addr: parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000))),
            scheduler_poll_interval: Duration::from_secs(parse_or("SCHEDULER_POLL_INTERVAL_SECS", 5)),
            scheduler_batch_size: parse_or("SCHEDULER_BATCH_SIZE", 100),
            scheduler_claim_lease: Duration::from_secs(parse_or("SCHEDULER_CLAIM_LEASE_SECS", 300)),
        }
    }
}

/// Reads and parses `key`, falling back to `default` when unset.
/// A value that is set but malformed aborts startup.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{} has an invalid value: {}", key, raw)),
        Err(_) => default,
    }
}
