//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};

use crate::touch::DEFAULT_CAPACITY;

/// Which record store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// JSON files under `STORE_ROOT`.
    File,
    /// In-process maps; lost on exit.
    Memory,
}

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store_backend: StoreBackend,
    /// Root directory for all storage.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Scheme clients use to reach the service, for URL binding.
    pub public_scheme: String,
    /// HS256 secret for account tokens; token routes reject when unset.
    pub token_secret: Option<String>,
    /// Upper bound on each store operation.
    pub store_timeout: Duration,
    /// Capacity of the last-used update queue.
    pub touch_queue: usize,
    /// Build identifier reported by `/heartbeat`.
    pub commit_sha: String,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_backend = match non_empty("STORE_BACKEND").as_deref() {
            None | Some("file") => StoreBackend::File,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("unknown STORE_BACKEND: {other}"),
        };
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP")?;
        let public_scheme = non_empty("PUBLIC_SCHEME").unwrap_or_else(|| "http".into());
        let token_secret = non_empty("TOKEN_SECRET");
        let store_timeout = Duration::from_millis(parse_or("STORE_TIMEOUT_MS", 5000)?);
        let touch_queue = parse_or("TOUCH_QUEUE", DEFAULT_CAPACITY)?;
        let commit_sha = non_empty("COMMIT_SHA").unwrap_or_else(|| "unknown".into());
        Ok(Self {
            store_backend,
            store_root,
            bind_http,
            public_scheme,
            token_secret,
            store_timeout,
            touch_queue,
            commit_sha,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid {key}: {v}")),
    }
}
