// src/config.rs
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub http_host: String,
    pub http_port: u16,
    pub database: DatabaseConfig,
    pub signaling: SignalingConfig,
    pub freeswitch: FreeSwitchServer,
    pub app_lookup_timeout: Duration,
    pub webhook_timeout: Duration,
    pub metrics_interval: Duration,
    pub capacity_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMode {
    /// Dial out to a signaling engine at a fixed address.
    Connect { host: String, port: u16 },
    /// Accept inbound connections from signaling engines.
    Listen { port: u16 },
}

/// What to do when an outbound signaling connect fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailurePolicy {
    Reconnect,
    Exit,
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub mode: SignalingMode,
    pub secret: String,
    pub on_connect_failure: ConnectFailurePolicy,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FreeSwitchServer {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl FreeSwitchServer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Reads the process environment; `.env` is loaded by the caller.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let database = DatabaseConfig {
            host: vars.required("DB_HOST")?,
            port: vars.parsed("DB_PORT", 5432)?,
            user: vars.required("DB_USER")?,
            password: vars.required("DB_PASSWORD")?,
            dbname: vars.required("DB_NAME")?,
        };

        let signaling_port: u16 = vars
            .required("SIGNALING_PORT")?
            .parse()
            .map_err(|e| ConfigError::Invalid {
                key: "SIGNALING_PORT",
                reason: format!("{}", e),
            })?;

        let mode = match vars.optional("SIGNALING_HOST") {
            Some(host) => SignalingMode::Connect {
                host,
                port: signaling_port,
            },
            None => SignalingMode::Listen {
                port: signaling_port,
            },
        };

        let on_connect_failure = match vars.optional("SIGNALING_CONNECT_FAILURE").as_deref() {
            None | Some("reconnect") => ConnectFailurePolicy::Reconnect,
            Some("exit") => ConnectFailurePolicy::Exit,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SIGNALING_CONNECT_FAILURE",
                    reason: format!("expected 'reconnect' or 'exit', got '{}'", other),
                })
            }
        };

        let signaling = SignalingConfig {
            mode,
            secret: vars.required("SIGNALING_SECRET")?,
            on_connect_failure,
            reconnect_delay: vars.secs("SIGNALING_RECONNECT_SECS", 5)?,
        };

        let freeswitch = Self::parse_freeswitch_server(&vars.required("FREESWITCH")?)?;

        Ok(Config {
            environment: vars
                .optional("ENVIRONMENT")
                .unwrap_or_else(|| "production".to_string()),
            http_host: vars
                .optional("HTTP_HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: vars.parsed("HTTP_PORT", 3000)?,
            database,
            signaling,
            freeswitch,
            app_lookup_timeout: vars.millis("APP_LOOKUP_TIMEOUT_MS", 2000)?,
            webhook_timeout: vars.millis("WEBHOOK_TIMEOUT_MS", 5000)?,
            metrics_interval: vars.secs("METRICS_INTERVAL_SECS", 5)?,
            capacity_poll_interval: vars.secs("CAPACITY_POLL_SECS", 30)?,
        })
    }

    /// Parses a `host:port:password` media engine descriptor.
    fn parse_freeswitch_server(descriptor: &str) -> Result<FreeSwitchServer, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            key: "FREESWITCH",
            reason,
        };

        let parts: Vec<&str> = descriptor.trim().splitn(3, ':').collect();
        if parts.len() != 3 || parts[0].is_empty() {
            return Err(invalid("expected host:port:password".to_string()));
        }

        Ok(FreeSwitchServer {
            host: parts[0].to_string(),
            port: parts[1]
                .parse()
                .map_err(|e| invalid(format!("bad port '{}': {}", parts[1], e)))?,
            password: parts[2].to_string(),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_millis)
    }

    /// Intervals and timeouts must be non-zero.
    fn positive(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(key, default)? {
            0 => Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".to_string(),
            }),
            n => Ok(n),
        }
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}
