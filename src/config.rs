use crate::store::S3Config;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "OBJECT_BROWSER_";

/// Which object store backs the service.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    /// Process-local store, contents are lost on exit.
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backend: BackendKind,
    pub s3: S3Config,
    pub list_page_size: Option<usize>,
    pub presign_ttl: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Folder browser over S3-compatible object stores")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_BROWSER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_BROWSER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides OBJECT_BROWSER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides OBJECT_BROWSER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// S3 endpoint, scheme optional (overrides OBJECT_BROWSER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    /// Use https for the S3 endpoint (overrides OBJECT_BROWSER_S3_USE_SSL)
    #[arg(long)]
    pub s3_use_ssl: Option<bool>,

    /// Max keys per list call (overrides OBJECT_BROWSER_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Default presigned URL lifetime in seconds
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// CLI values win; `lookup` supplies the unprefixed environment names.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let env_backend = match var("BACKEND") {
            Some(raw) => <BackendKind as ValueEnum>::from_str(&raw, true)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("parsing {ENV_PREFIX}BACKEND value `{raw}`"))?,
            None => BackendKind::S3,
        };
        let env_page_size = parse_var::<usize>(&var, "LIST_PAGE_SIZE")?;

        let s3 = S3Config {
            endpoint: args
                .s3_endpoint
                .or_else(|| var("S3_ENDPOINT"))
                .unwrap_or_else(|| "http://localhost:9000".into()),
            region: args
                .s3_region
                .or_else(|| var("S3_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            access_key: var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: var("S3_SECRET_KEY").unwrap_or_default(),
            use_ssl: match args.s3_use_ssl {
                Some(flag) => flag,
                None => parse_var::<bool>(&var, "S3_USE_SSL")?.unwrap_or(false),
            },
            page_size: None,
        };

        let list_page_size = args.list_page_size.or(env_page_size).filter(|size| *size > 0);
        let presign_secs = match args.presign_ttl_secs {
            Some(secs) => secs,
            None => parse_var::<u64>(&var, "PRESIGN_TTL_SECS")?.unwrap_or(900),
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => parse_var::<u16>(&var, "PORT")?.unwrap_or(3000),
            },
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/object_browser.db".into()),
            backend: args.backend.unwrap_or(env_backend),
            s3: S3Config {
                page_size: list_page_size.and_then(|size| i32::try_from(size).ok()),
                ..s3
            },
            list_page_size,
            presign_ttl: Duration::from_secs(presign_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{raw}`")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_input() {
        let cfg = AppConfig::merge(Args::default(), env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, BackendKind::S3);
        assert_eq!(cfg.s3.region, "us-east-1");
        assert_eq!(cfg.presign_ttl, Duration::from_secs(900));
        assert!(!cfg.s3.use_ssl);
        assert_eq!(cfg.list_page_size, None);
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args::try_parse_from(["object-browser", "--port", "8080", "--backend", "memory"])
            .unwrap();
        let cfg = AppConfig::merge(
            args,
            env(&[("PORT", "9000"), ("BACKEND", "s3"), ("LIST_PAGE_SIZE", "50")]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.backend, BackendKind::Memory);
        assert_eq!(cfg.list_page_size, Some(50));
        assert_eq!(cfg.s3.page_size, Some(50));
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = AppConfig::merge(Args::default(), env(&[("PORT", "http")])).unwrap_err();
        assert!(format!("{err:#}").contains("OBJECT_BROWSER_PORT"));

        let err = AppConfig::merge(Args::default(), env(&[("BACKEND", "ftp")])).unwrap_err();
        assert!(format!("{err:#}").contains("OBJECT_BROWSER_BACKEND"));
    }

    #[test]
    fn secrets_stay_out_of_debug_output() {
        let cfg = AppConfig::merge(
            Args::default(),
            env(&[("S3_ACCESS_KEY", "AKIA123"), ("S3_SECRET_KEY", "hunter2")]),
        )
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("AKIA123"));
    }
}
