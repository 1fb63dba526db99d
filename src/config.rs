use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_PATH: &str = "/etc/lambda-tags-exporter/config.yaml";

pub const DEFAULT_INTERVAL: &str = "10";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

// One day. Longer periods would overflow timer deadlines.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Inner {
    function_name: Option<String>,

    listen_addr: Option<String>,

    log_level: Option<String>,

    endpoint_url: Option<String>,
}

/// Values given on the command line. They take precedence over the
/// environment and the config file.
#[derive(Default)]
pub struct Overrides {
    pub function_name: Option<String>,
    pub listen_addr: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    inner: Inner,
    interval: Duration,
    listen_addr: SocketAddr,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P, overrides: Overrides) -> Result<Self, ConfigError> {
        let inner: Inner = match std::fs::File::open(path.as_ref()) {
            Ok(file) => serde_yaml::from_reader(file).map_err(|source| ConfigError::Parse {
                path: path.as_ref().to_path_buf(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Inner::default(),
            Err(source) => {
                return Err(ConfigError::File {
                    path: path.as_ref().to_path_buf(),
                    source,
                })
            }
        };

        Self::from_inner(inner, overrides)
    }

    fn from_inner(mut inner: Inner, overrides: Overrides) -> Result<Self, ConfigError> {
        let interval = parse_interval(overrides.interval.as_deref().unwrap_or(DEFAULT_INTERVAL))?;

        inner.function_name = overrides
            .function_name
            .or_else(|| env_var("TAGS_EXPORTER_FUNCTION_NAME"))
            .or(inner.function_name);

        match inner.function_name {
            Some(ref name) if !name.trim().is_empty() => (),
            _ => return Err(ConfigError::MissingFunctionName),
        }

        inner.listen_addr = overrides
            .listen_addr
            .or_else(|| env_var("TAGS_EXPORTER_LISTEN_ADDR"))
            .or(inner.listen_addr);

        let addr = inner.listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen_addr = addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(addr.to_string()))?;

        Ok(Self {
            inner,
            interval,
            listen_addr,
        })
    }

    pub fn function_name(&self) -> &str {
        // validated in from_inner
        self.inner.function_name.as_deref().unwrap_or_default()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn log_level(&self) -> String {
        env_var("TAGS_EXPORTER_LOG_LEVEL")
            .or_else(|| self.inner.log_level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn endpoint_url(&self) -> Option<String> {
        env_var("TAGS_EXPORTER_ENDPOINT_URL").or_else(|| self.inner.endpoint_url.clone())
    }
}

/// Parses the polling interval, given in whole seconds. Surrounding
/// whitespace is rejected, and so is anything above `MAX_INTERVAL`.
pub fn parse_interval(val: &str) -> Result<Duration, ConfigError> {
    match val.parse::<u64>().map(Duration::from_secs) {
        Ok(interval) if !interval.is_zero() && interval <= MAX_INTERVAL => Ok(interval),
        _ => Err(ConfigError::InvalidInterval(val.to_string())),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
