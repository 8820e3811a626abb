use crate::util::retry::RetryPolicy;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SPEC_PATH: &str = "/home/pgedge/cluster.json";
pub const DEFAULT_STATUS_PATH: &str = "/data/init-status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVersion {
    Pg15,
    Pg16,
    Pg17,
}

impl EngineVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "15" => Some(Self::Pg15),
            "16" => Some(Self::Pg16),
            "17" => Some(Self::Pg17),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pg15 => "15",
            Self::Pg16 => "16",
            Self::Pg17 => "17",
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct SeedCredentials {
    pub dbname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedCredentials")
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub retry: RetryPolicy,
    pub startup_delay: Duration,
    pub settle_delay: Duration,
    pub subscribe_pause: Duration,
    pub connect_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            startup_delay: Duration::from_secs(3),
            settle_delay: Duration::from_secs(5),
            subscribe_pause: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Timings {
    pub fn immediate() -> Self {
        Self {
            retry: RetryPolicy::immediate(),
            startup_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            subscribe_pause: Duration::ZERO,
            connect_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub spec_path: PathBuf,
    pub status_path: PathBuf,
    pub force_init: bool,
    pub node_name: String,
    pub node_id: String,
    pub engine_version: Option<EngineVersion>,
    pub seed: SeedCredentials,
    pub timings: Timings,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let paths = PathConfig::from_env();
        let identity = IdentityConfig::from_env()?;
        let timings = TimingConfig::from_env();
        Ok(Self::from_parts(paths, identity, timings))
    }

    fn from_parts(paths: PathConfig, identity: IdentityConfig, timings: TimingConfig) -> Self {
        Self {
            spec_path: paths.spec_path,
            status_path: paths.status_path,
            force_init: paths.force_init,
            node_name: identity.node_name,
            node_id: identity.node_id,
            engine_version: identity.engine_version,
            seed: identity.seed,
            timings: timings.into_timings(),
        }
    }
}

struct PathConfig {
    spec_path: PathBuf,
    status_path: PathBuf,
    force_init: bool,
}

impl PathConfig {
    fn from_env() -> Self {
        Self {
            spec_path: PathBuf::from(env_or_default("PGEDGE_CLUSTER_SPEC", DEFAULT_SPEC_PATH)),
            status_path: PathBuf::from(env_or_default(
                "PGEDGE_INIT_STATUS_FILE",
                DEFAULT_STATUS_PATH,
            )),
            force_init: env::var("FORCE_INIT")
                .ok()
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
        }
    }
}

struct IdentityConfig {
    node_name: String,
    node_id: String,
    engine_version: Option<EngineVersion>,
    seed: SeedCredentials,
}

impl IdentityConfig {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            node_name: env_or_default("NODE_NAME", "n1"),
            node_id: env_or_default("NODE_ID", "-1"),
            engine_version: load_engine_version()?,
            seed: SeedCredentials {
                dbname: non_empty_env("INIT_DATABASE"),
                username: non_empty_env("INIT_USERNAME"),
                password: non_empty_env("INIT_PASSWORD"),
            },
        })
    }
}

struct TimingConfig {
    retry_delay: Duration,
    retry_max_delay: Option<Duration>,
    retry_backoff: u32,
    retry_jitter: Duration,
    retry_max_attempts: Option<u32>,
    startup_delay: Duration,
    settle_delay: Duration,
    subscribe_pause: Duration,
    connect_timeout: Duration,
}

impl TimingConfig {
    fn from_env() -> Self {
        Self {
            retry_delay: millis_env("PGEDGE_RETRY_DELAY_MS", 2000),
            retry_max_delay: parse_env::<u64>("PGEDGE_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis),
            retry_backoff: parse_env("PGEDGE_RETRY_BACKOFF").unwrap_or(1),
            retry_jitter: millis_env("PGEDGE_RETRY_JITTER_MS", 0),
            retry_max_attempts: parse_env::<u32>("PGEDGE_RETRY_MAX_ATTEMPTS")
                .filter(|value| *value > 0),
            startup_delay: millis_env("PGEDGE_STARTUP_DELAY_MS", 3000),
            settle_delay: millis_env("PGEDGE_SETTLE_DELAY_MS", 5000),
            subscribe_pause: millis_env("PGEDGE_SUBSCRIBE_PAUSE_MS", 2000),
            connect_timeout: millis_env("PGEDGE_CONNECT_TIMEOUT_MS", 5000),
        }
    }

    fn into_timings(self) -> Timings {
        let mut retry = RetryPolicy::fixed(self.retry_delay)
            .with_backoff(
                self.retry_backoff,
                self.retry_max_delay.unwrap_or(self.retry_delay),
            )
            .with_jitter(self.retry_jitter);
        if let Some(max_attempts) = self.retry_max_attempts {
            retry = retry.with_max_attempts(max_attempts);
        }
        Timings {
            retry,
            startup_delay: self.startup_delay,
            settle_delay: self.settle_delay,
            subscribe_pause: self.subscribe_pause,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn load_engine_version() -> Result<Option<EngineVersion>, String> {
    let Some(raw) = non_empty_env("PGV") else {
        return Ok(None);
    };
    EngineVersion::parse(&raw)
        .map(Some)
        .ok_or_else(|| format!("unrecognized postgres version: '{raw}'"))
}

fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn millis_env(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(parse_env(key).unwrap_or(default_ms))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
