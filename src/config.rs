use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{env, fmt, fs, path::PathBuf};

const DEFAULT_CONFIG_PATH: &str = "configs/config.json";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DB_PATH: &str = "uploads.db";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Centralized application configuration.
/// Loaded from a JSON document, then overridden by CLI arguments.
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    /// Shared secret expected in the `X-API-Key` header.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub ui_username: String,
    /// Lowercase hex MD5 of the UI password.
    #[serde(default)]
    pub ui_password_hash: String,
    #[serde(default)]
    pub data_dir: String,
    #[serde(default)]
    pub db_path: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub host: String,
    /// Directory served for unmatched paths (the web UI).
    #[serde(default)]
    pub assets_dir: Option<String>,
    /// Run an orphan sweep this often; unset or 0 disables it.
    #[serde(default)]
    pub reconcile_interval_secs: Option<u64>,
}

/// What the process should do after loading its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile,
}

/// Command-line configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Authenticated file upload and sharing service")]
pub struct Args {
    /// Path to the JSON config file (overrides FILE_VAULT_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored
    #[arg(long)]
    pub data_dir: Option<String>,

    /// SQLite database file
    #[arg(long)]
    pub db_path: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Remove orphan records and stale staged uploads, then exit
    #[arg(long, conflicts_with = "migrate")]
    pub reconcile: bool,
}

impl AppConfig {
    /// Parse the config file named by CLI/env and merge CLI overrides.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();

        let path = args
            .config
            .clone()
            .or_else(|| env::var_os("FILE_VAULT_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config file `{}`", path.display()))?;
        let mut cfg = Self::from_json(&raw)
            .with_context(|| format!("parsing config file `{}`", path.display()))?;

        if let Some(host) = args.host {
            cfg.host = host;
        }
        if let Some(port) = args.port {
            cfg.port = port;
        }
        if let Some(data_dir) = args.data_dir {
            cfg.data_dir = data_dir;
        }
        if let Some(db_path) = args.db_path {
            cfg.db_path = db_path;
        }

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };
        Ok((cfg, mode))
    }

    /// Parse a JSON document and fill in defaults for unset fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut cfg: Self = serde_json::from_str(raw)?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.data_dir.is_empty() {
            self.data_dir = DEFAULT_DATA_DIR.into();
        }
        if self.db_path.is_empty() {
            self.db_path = DEFAULT_DB_PATH.into();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.into();
        }
        if self.reconcile_interval_secs == Some(0) {
            self.reconcile_interval_secs = None;
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"<redacted>")
            .field("ui_username", &self.ui_username)
            .field("ui_password_hash", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("assets_dir", &self.assets_dir)
            .field("reconcile_interval_secs", &self.reconcile_interval_secs)
            .finish()
    }
}
