use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The application's configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The listening port.
    pub port: u16,
    /// The bind address.
    pub host: IpAddr,
    /// Timezone for calendar-day comparisons and "is this date in the future" checks.
    pub timezone: Tz,
    /// Upper bound on one portal login.
    pub login_timeout: Duration,
    /// Buffered progress events per job before the oldest are dropped.
    /// Rounded up to the next power of two by the channel.
    pub progress_buffer: usize,
    /// How long finished jobs stay queryable.
    pub job_retention: Duration,
    /// Canned portal data for the fixture driver.
    pub portal_fixture: Option<PathBuf>,
    /// Static front-end served for unmatched routes.
    pub static_dir: PathBuf,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timezone: chrono_tz::Australia::Sydney,
            login_timeout: Duration::from_secs(15),
            progress_buffer: crate::services::progress::DEFAULT_CAPACITY,
            job_retention: Duration::from_secs(900),
            portal_fixture: None,
            static_dir: PathBuf::from("public"),
            rate_limit_per_second: 20,
            rate_limit_burst: 60,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", name, value)),
        None => Ok(default),
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a `Config` from any variable source; unset or blank variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let timezone = match lookup("VALIDATION_TIMEZONE").filter(|v| !v.trim().is_empty()) {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("Invalid VALIDATION_TIMEZONE {:?}: {}", name, e))?,
            None => defaults.timezone,
        };

        let progress_buffer = parse_or(&lookup, "PROGRESS_BUFFER", defaults.progress_buffer)?;
        if progress_buffer == 0 {
            anyhow::bail!("PROGRESS_BUFFER must be at least 1");
        }

        let rate_limit_per_second =
            parse_or(&lookup, "RATE_LIMIT_PER_SECOND", defaults.rate_limit_per_second)?;
        let rate_limit_burst = parse_or(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst)?;
        if rate_limit_per_second == 0 || rate_limit_burst == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be positive");
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            host: parse_or(&lookup, "HOST", defaults.host)?,
            timezone,
            login_timeout: Duration::from_secs(parse_or(
                &lookup,
                "LOGIN_TIMEOUT_SECS",
                defaults.login_timeout.as_secs(),
            )?),
            progress_buffer,
            job_retention: Duration::from_secs(parse_or(
                &lookup,
                "JOB_RETENTION_SECS",
                defaults.job_retention.as_secs(),
            )?),
            portal_fixture: lookup("PORTAL_FIXTURE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            static_dir: lookup("STATIC_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            rate_limit_per_second,
            rate_limit_burst,
        })
    }
}
