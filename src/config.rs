use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which object store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Payloads on local disk, metadata in SQLite.
    Disk,
    /// In-process only; everything is lost on restart.
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Backend::Disk),
            "memory" => Ok(Backend::Memory),
            other => bail!("unknown backend `{}` (expected `disk` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    /// Pin the bucket instead of asking the store for its default.
    pub bucket: Option<String>,
    /// Name of the store's own default bucket.
    pub default_bucket: String,
    pub public_base_url: String,
    /// Maximum age under `live/` before an object is moved to trash.
    pub retention: Duration,
    /// In-process sweep cadence; `None` leaves sweeping to `/cleanup-task`.
    pub sweep_interval: Option<Duration>,
    pub store_timeout: Duration,
    pub sweep_concurrency: usize,
    pub sweep_page_size: usize,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File transit upload relay")]
pub struct Args {
    /// Host to bind to (overrides FILE_TRANSIT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_TRANSIT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides FILE_TRANSIT_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory where object payloads are stored (overrides FILE_TRANSIT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides FILE_TRANSIT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket to use instead of the store default (overrides FILE_TRANSIT_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base of redirect URLs (overrides FILE_TRANSIT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Retention window in seconds (overrides FILE_TRANSIT_RETENTION_SECS)
    #[arg(long)]
    pub retention_secs: Option<u64>,

    /// Run a sweep every N seconds; 0 disables (overrides FILE_TRANSIT_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Create the metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_opt("FILE_TRANSIT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_or("FILE_TRANSIT_PORT", 3000u16)?;
        let env_backend = env_or("FILE_TRANSIT_BACKEND", Backend::Disk)?;
        let env_storage =
            env_opt("FILE_TRANSIT_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = env_opt("FILE_TRANSIT_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/file_transit.db".into());
        let env_public = env_opt("FILE_TRANSIT_PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".into());
        let env_retention = env_or("FILE_TRANSIT_RETENTION_SECS", 600u64)?;
        let env_interval = env_or("FILE_TRANSIT_SWEEP_INTERVAL_SECS", 0u64)?;

        let retention_secs = args.retention_secs.unwrap_or(env_retention);
        let sweep_interval_secs = args.sweep_interval_secs.unwrap_or(env_interval);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.or_else(|| env_opt("FILE_TRANSIT_BUCKET")),
            default_bucket: env_opt("FILE_TRANSIT_DEFAULT_BUCKET")
                .unwrap_or_else(|| "file-transit".into()),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            retention: Duration::from_secs(retention_secs),
            sweep_interval: (sweep_interval_secs > 0)
                .then(|| Duration::from_secs(sweep_interval_secs)),
            store_timeout: Duration::from_secs(env_or(
                "FILE_TRANSIT_STORE_TIMEOUT_SECS",
                30u64,
            )?),
            sweep_concurrency: env_or("FILE_TRANSIT_SWEEP_CONCURRENCY", 8usize)?,
            sweep_page_size: env_or("FILE_TRANSIT_SWEEP_PAGE_SIZE", 500usize)?,
            max_upload_bytes: env_or("FILE_TRANSIT_MAX_UPLOAD_BYTES", 32 * 1024 * 1024usize)?,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
