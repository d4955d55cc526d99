use crate::error::ConfigError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    Production,
    Development,
}

impl RuntimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Production => "production",
            RuntimeMode::Development => "development",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgSslMode {
    Disable,
    Prefer,
    Require,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: PgSslMode,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub enum DatabaseConfig {
    Sqlite { path: String },
    Postgres(PostgresConfig),
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub mode: RuntimeMode,
    pub bind_addr: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub chat_id_prefix_len: usize,
    pub chat_action_marker: String,
    pub expiry_minutes: u32,
    pub reconcile_interval_secs: Option<u64>,
    pub reconcile_concurrency: usize,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub cron_secret: Option<String>,
    pub telegram_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let mode = match get("MEDIA_MIRROR_ENV").as_deref() {
            Some("production") => RuntimeMode::Production,
            Some("development") | None => RuntimeMode::Development,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "MEDIA_MIRROR_ENV",
                    value: other.to_string(),
                });
            }
        };

        let database = match get("DATABASE_HOST") {
            Some(host) => DatabaseConfig::Postgres(PostgresConfig {
                host,
                port: parse_or(&get, "DATABASE_PORT", 5432)?,
                database: get("DATABASE_NAME").unwrap_or_else(|| "postgres".to_string()),
                username: get("DATABASE_USER"),
                password: get("DATABASE_PASSWORD"),
                ssl_mode: match get("DATABASE_SSL_MODE").as_deref() {
                    None | Some("require") => PgSslMode::Require,
                    Some("prefer") => PgSslMode::Prefer,
                    Some("disable") => PgSslMode::Disable,
                    Some(other) => {
                        return Err(ConfigError::Invalid {
                            key: "DATABASE_SSL_MODE",
                            value: other.to_string(),
                        });
                    }
                },
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 16)?,
                idle_timeout_secs: parse_or(&get, "DATABASE_IDLE_TIMEOUT", 300)?,
                connect_timeout_secs: parse_or(&get, "DATABASE_CONNECT_TIMEOUT", 10)?,
            }),
            None => DatabaseConfig::Sqlite {
                path: get("MEDIA_MIRROR_DB_PATH")
                    .unwrap_or_else(|| "./media_mirror.db".to_string()),
            },
        };

        let reconcile_interval_secs = match get("RECONCILE_INTERVAL_SECS") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "RECONCILE_INTERVAL_SECS",
                value: raw,
            })?),
            None => None,
        }
        .filter(|secs| *secs > 0);

        Ok(Self {
            bot_token,
            mode,
            bind_addr: get("MEDIA_MIRROR_BIND").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "MEDIA_MIRROR_PORT", 9103)?,
            database,
            chat_id_prefix_len: parse_or(&get, "CHAT_ID_PREFIX_LEN", 4)?,
            chat_action_marker: get("CHAT_ACTION_MARKER")
                .unwrap_or_else(|| "Chat action".to_string()),
            expiry_minutes: parse_or(&get, "FILE_URL_EXPIRY_MINUTES", 60)?,
            reconcile_interval_secs,
            reconcile_concurrency: parse_or::<usize, _>(&get, "RECONCILE_CONCURRENCY", 1)?.max(1),
            webhook_url: get("WEBHOOK_URL"),
            webhook_secret: get("WEBHOOK_SECRET"),
            cron_secret: get("CRON_SECRET"),
            telegram_api_url: get("TELEGRAM_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
        })
    }

    pub fn store_backend(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres(_) => "postgres",
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
