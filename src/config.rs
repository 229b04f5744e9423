use crate::services::{
    maintenance::SweepPlan,
    object_store::{RemoveMode, StoreConfig},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Where object payloads are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Files under the storage directory.
    Fs,
    /// One MongoDB collection per bucket.
    Mongo,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub secret: String,
    pub api_prefix: String,
    pub default_schema: String,
    pub remove_mode: RemoveMode,
    pub backend_timeout: Option<Duration>,
    pub max_object_size: usize,
    pub retention: Option<Duration>,
    pub sweep_interval: Duration,
    pub sweep_buckets: Vec<(String, String)>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object catalog with signed-token downloads")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Catalog database URL (overrides OBJECT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend (overrides OBJECT_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory for the fs backend (overrides OBJECT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// MongoDB URI for the mongo backend (overrides OBJECT_STORE_MONGO_URI)
    #[arg(long)]
    pub mongo_uri: Option<String>,

    /// MongoDB database name (overrides OBJECT_STORE_MONGO_DATABASE)
    #[arg(long)]
    pub mongo_database: Option<String>,

    /// Download token signing secret (overrides OBJECT_STORE_SECRET). Required.
    #[arg(long)]
    pub secret: Option<String>,

    /// Prefix for object routes and download URLs (overrides OBJECT_STORE_API_PREFIX)
    #[arg(long)]
    pub api_prefix: Option<String>,

    /// Schema used when a request names none (overrides OBJECT_STORE_DEFAULT_SCHEMA)
    #[arg(long)]
    pub default_schema: Option<String>,

    /// Hard or soft delete on remove (overrides OBJECT_STORE_REMOVE_MODE)
    #[arg(long, value_enum)]
    pub remove_mode: Option<RemoveMode>,

    /// Timeout for each blob backend call in seconds, 0 disables (overrides OBJECT_STORE_BACKEND_TIMEOUT_SECS)
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides OBJECT_STORE_MAX_OBJECT_SIZE)
    #[arg(long)]
    pub max_object_size: Option<usize>,

    /// Retention window in hours; enables the retention sweep (overrides OBJECT_STORE_RETENTION_HOURS)
    #[arg(long)]
    pub retention_hours: Option<u64>,

    /// Seconds between maintenance rounds (overrides OBJECT_STORE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// `schema/bucket` to sweep for orphaned blobs; repeatable (overrides OBJECT_STORE_SWEEP_BUCKETS, comma-separated)
    #[arg(long = "sweep-bucket")]
    pub sweep_buckets: Vec<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables `env` yields; CLI values win.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match args.backend {
            Some(kind) => kind,
            None => match env("OBJECT_STORE_BACKEND") {
                Some(value) => <BackendKind as ValueEnum>::from_str(&value, true)
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| format!("parsing OBJECT_STORE_BACKEND value `{}`", value))?,
                None => BackendKind::Fs,
            },
        };
        let remove_mode = match args.remove_mode {
            Some(mode) => mode,
            None => match env("OBJECT_STORE_REMOVE_MODE") {
                Some(value) => <RemoveMode as ValueEnum>::from_str(&value, true)
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| {
                        format!("parsing OBJECT_STORE_REMOVE_MODE value `{}`", value)
                    })?,
                None => RemoveMode::Hard,
            },
        };

        let secret = args
            .secret
            .or_else(|| env("OBJECT_STORE_SECRET"))
            .filter(|s| !s.trim().is_empty());
        let Some(secret) = secret else {
            bail!("a signing secret is required: set OBJECT_STORE_SECRET or pass --secret");
        };

        let backend_timeout_secs = match args.backend_timeout_secs {
            Some(v) => v,
            None => parse_env(&env, "OBJECT_STORE_BACKEND_TIMEOUT_SECS", 30)?,
        };
        let retention_hours = match args.retention_hours {
            Some(v) => Some(v),
            None => parse_env_opt(&env, "OBJECT_STORE_RETENTION_HOURS")?,
        };
        let retention = match retention_hours {
            Some(hours) => match hours.checked_mul(60 * 60) {
                Some(secs) => Some(Duration::from_secs(secs)),
                None => bail!("retention of {} hours is too large", hours),
            },
            None => None,
        };
        let sweep_interval_secs = match args.sweep_interval_secs {
            Some(v) => v,
            None => parse_env(&env, "OBJECT_STORE_SWEEP_INTERVAL_SECS", 3600)?,
        };
        if sweep_interval_secs == 0 {
            bail!("sweep interval must be at least one second");
        }

        let raw_buckets = if args.sweep_buckets.is_empty() {
            env("OBJECT_STORE_SWEEP_BUCKETS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            args.sweep_buckets
        };
        let sweep_buckets = raw_buckets
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(parse_sweep_bucket)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host: args
                .host
                .or_else(|| env("OBJECT_STORE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(p) => p,
                None => parse_env(&env, "OBJECT_STORE_PORT", 3000)?,
            },
            database_url: args
                .database_url
                .or_else(|| env("OBJECT_STORE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/object_store.db".into()),
            backend,
            storage_dir: args
                .storage_dir
                .or_else(|| env("OBJECT_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            mongo_uri: args
                .mongo_uri
                .or_else(|| env("OBJECT_STORE_MONGO_URI"))
                .unwrap_or_else(|| "mongodb://localhost:27017".into()),
            mongo_database: args
                .mongo_database
                .or_else(|| env("OBJECT_STORE_MONGO_DATABASE"))
                .unwrap_or_else(|| "objects".into()),
            secret,
            api_prefix: args
                .api_prefix
                .or_else(|| env("OBJECT_STORE_API_PREFIX"))
                .unwrap_or_else(|| "/api/v1/s3".into()),
            default_schema: args
                .default_schema
                .or_else(|| env("OBJECT_STORE_DEFAULT_SCHEMA"))
                .unwrap_or_else(|| "public".into()),
            remove_mode,
            backend_timeout: (backend_timeout_secs > 0)
                .then(|| Duration::from_secs(backend_timeout_secs)),
            max_object_size: match args.max_object_size {
                Some(v) => v,
                None => parse_env(&env, "OBJECT_STORE_MAX_OBJECT_SIZE", 64 * 1024 * 1024)?,
            },
            retention,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            sweep_buckets,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            secret: self.secret.clone(),
            api_prefix: self.api_prefix.clone(),
            remove_mode: self.remove_mode,
            backend_timeout: self.backend_timeout,
        }
    }

    /// Maintenance plan, or `None` when there is nothing to sweep.
    pub fn sweep_plan(&self) -> Option<SweepPlan> {
        if self.retention.is_none() && self.sweep_buckets.is_empty() {
            return None;
        }
        Some(SweepPlan {
            retention: self.retention,
            every: self.sweep_interval,
            orphan_buckets: self.sweep_buckets.clone(),
        })
    }
}

fn parse_env_opt<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_env_opt(env, name)?.unwrap_or(default))
}

fn parse_sweep_bucket(raw: &str) -> Result<(String, String)> {
    match raw.split_once('/') {
        Some((schema, bucket)) if !schema.is_empty() && !bucket.is_empty() => {
            Ok((schema.to_string(), bucket.to_string()))
        }
        _ => bail!("sweep bucket `{}` must look like schema/bucket", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("s3-catalog").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn secret_is_mandatory() {
        let err = AppConfig::resolve(args(&[]), env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("secret"));

        let err = AppConfig::resolve(args(&[]), env_of(&[("OBJECT_STORE_SECRET", " ")])).unwrap_err();
        assert!(err.to_string().contains("secret"));
    }

    #[test]
    fn defaults() {
        let cfg = AppConfig::resolve(args(&["--secret", "s"]), env_of(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, BackendKind::Fs);
        assert_eq!(cfg.api_prefix, "/api/v1/s3");
        assert_eq!(cfg.default_schema, "public");
        assert_eq!(cfg.remove_mode, RemoveMode::Hard);
        assert_eq!(cfg.backend_timeout, Some(Duration::from_secs(30)));
        assert!(cfg.sweep_plan().is_none());
    }

    #[test]
    fn cli_overrides_env() {
        let env = env_of(&[
            ("OBJECT_STORE_SECRET", "from-env"),
            ("OBJECT_STORE_PORT", "4000"),
            ("OBJECT_STORE_BACKEND", "mongo"),
            ("OBJECT_STORE_REMOVE_MODE", "soft"),
        ]);
        let cfg = AppConfig::resolve(args(&["--port", "5000", "--secret", "cli"]), env).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.secret, "cli");
        assert_eq!(cfg.backend, BackendKind::Mongo);
        assert_eq!(cfg.remove_mode, RemoveMode::Soft);
    }

    #[test]
    fn bad_port_is_reported() {
        let env = env_of(&[("OBJECT_STORE_SECRET", "s"), ("OBJECT_STORE_PORT", "http")]);
        let err = AppConfig::resolve(args(&[]), env).unwrap_err();
        assert!(format!("{:#}", err).contains("OBJECT_STORE_PORT"));
    }

    #[test]
    fn sweep_plan_from_env() {
        let env = env_of(&[
            ("OBJECT_STORE_SECRET", "s"),
            ("OBJECT_STORE_RETENTION_HOURS", "24"),
            ("OBJECT_STORE_SWEEP_BUCKETS", "public/avatars, tenant/docs"),
            ("OBJECT_STORE_BACKEND_TIMEOUT_SECS", "0"),
        ]);
        let cfg = AppConfig::resolve(args(&[]), env).unwrap();
        assert_eq!(cfg.backend_timeout, None);
        let plan = cfg.sweep_plan().unwrap();
        assert_eq!(plan.retention, Some(Duration::from_secs(24 * 3600)));
        assert_eq!(
            plan.orphan_buckets,
            vec![
                ("public".to_string(), "avatars".to_string()),
                ("tenant".to_string(), "docs".to_string())
            ]
        );
    }

    #[test]
    fn oversized_retention_is_rejected() {
        let env = env_of(&[
            ("OBJECT_STORE_SECRET", "s"),
            ("OBJECT_STORE_RETENTION_HOURS", &u64::MAX.to_string()),
        ]);
        let err = AppConfig::resolve(args(&[]), env).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn malformed_sweep_bucket_is_rejected() {
        let err = AppConfig::resolve(
            args(&["--secret", "s", "--sweep-bucket", "nobucket"]),
            env_of(&[]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("schema/bucket"));
    }
}
