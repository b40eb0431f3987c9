use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `ROOMBOOK_*` environment variables.
/// Missing or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "roombook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parsed(&lookup, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("ROOMBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "ROOMBOOK_MAX_CONNECTIONS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed(&lookup, "ROOMBOOK_SWEEP_INTERVAL_SECS")
                .filter(|&s: &u64| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            tls_cert: lookup("ROOMBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("ROOMBOOK_TLS_KEY").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw:?}, using default");
            None
        }
    }
}
