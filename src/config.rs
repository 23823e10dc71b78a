use std::{env, str::FromStr};

use thiserror::Error;
use url::Url;

/// 1st July 2022, roughly when replays started being written to S3.
pub const DEFAULT_SCORE_CUTOFF: i64 = 1656630000;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_TABLES: [&str; 3] = ["scores", "scores_relax", "scores_ap"];

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub endpoint: Url,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// `mysql://` connection url
    pub url: String,
}

/// Where replay ids come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMode {
    Database {
        database: DatabaseConfig,
        tables: Vec<String>,
        cutoff: i64,
        page_size: u32,
    },
    /// Everything listed under `replays/` on the FTP server.
    Listing,
}

/// What to do when writing a replay to the bucket fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    #[default]
    Continue,
    Abort,
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(WritePolicy::Continue),
            "abort" => Ok(WritePolicy::Abort),
            other => Err(format!("expected `continue` or `abort`, got `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ftp: FtpConfig,
    pub store: StoreConfig,
    pub source: SourceMode,
    pub concurrency: usize,
    pub on_write_error: WritePolicy,
}

impl Config {
    /// Reads the process environment. Call `dotenv::dotenv()` first to pick up `./.env`.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let ftp = FtpConfig {
            host: vars.required("FTP_HOST")?,
            port: vars.parsed("FTP_PORT")?,
            user: vars.required("FTP_USER")?,
            password: vars.required("FTP_PASS")?,
        };

        let endpoint = vars.required("AWS_ENDPOINT_URL")?;
        let store = StoreConfig {
            access_key_id: vars.required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: vars.required("AWS_SECRET_ACCESS_KEY")?,
            bucket: vars.required("AWS_BUCKET_NAME")?,
            endpoint: Url::parse(&endpoint).map_err(|e| ConfigError::Invalid {
                var: "AWS_ENDPOINT_URL",
                reason: e.to_string(),
            })?,
            region: vars
                .optional("AWS_REGION")
                .unwrap_or_else(|| "us-east-1".to_string()),
        };

        let mode = vars
            .optional("REPLAY_SOURCE")
            .unwrap_or_else(|| "database".to_string());
        let source = match mode.trim().to_ascii_lowercase().as_str() {
            "database" => {
                let connection_string = vars.required("DATABASE_CONNECTION_STRING")?;
                SourceMode::Database {
                    database: DatabaseConfig {
                        url: mysql_url(&connection_string).map_err(|reason| {
                            ConfigError::Invalid {
                                var: "DATABASE_CONNECTION_STRING",
                                reason,
                            }
                        })?,
                    },
                    tables: score_tables(vars.optional("SCORE_TABLES"))?,
                    cutoff: vars.parsed_or("SCORE_CUTOFF", DEFAULT_SCORE_CUTOFF)?,
                    page_size: vars.positive("PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
                }
            }
            "listing" => SourceMode::Listing,
            other => {
                return Err(ConfigError::Invalid {
                    var: "REPLAY_SOURCE",
                    reason: format!("expected `database` or `listing`, got `{}`", other),
                })
            }
        };

        Ok(Config {
            ftp,
            store,
            source,
            concurrency: vars.positive("MIGRATE_CONCURRENCY", 1)?,
            on_write_error: vars.parsed_or("ON_WRITE_ERROR", WritePolicy::default())?,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        parse_value(var, &self.required(var)?)
    }

    fn parsed_or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.optional(var) {
            Some(value) => parse_value(var, &value),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: ToString,
    {
        let value = self.parsed_or(var, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                var,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }
}

fn parse_value<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn score_tables(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let tables: Vec<String> = match value {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        None => DEFAULT_TABLES.iter().map(|t| t.to_string()).collect(),
    };

    if tables.is_empty() {
        return Err(ConfigError::Invalid {
            var: "SCORE_TABLES",
            reason: "no tables given".to_string(),
        });
    }
    // names are interpolated into SQL
    if let Some(bad) = tables
        .iter()
        .find(|t| !t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
    {
        return Err(ConfigError::Invalid {
            var: "SCORE_TABLES",
            reason: format!("`{}` is not a valid table name", bad),
        });
    }

    Ok(tables)
}

/// Accepts either a `mysql://` url or an ADO.NET style
/// `Server=..;User ID=..;Password=..;Database=..` string.
pub fn mysql_url(connection_string: &str) -> Result<String, String> {
    let connection_string = connection_string.trim();
    if connection_string.starts_with("mysql://") || connection_string.starts_with("mariadb://") {
        return Url::parse(connection_string)
            .map(|url| url.to_string())
            .map_err(|e| e.to_string());
    }

    let mut url = Url::parse("mysql://localhost").map_err(|e| e.to_string())?;
    let mut has_host = false;

    for pair in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("`{}` is not a key=value pair", pair.trim()))?;
        let value = value.trim();

        match key.trim().to_ascii_lowercase().as_str() {
            "server" | "host" | "data source" | "datasource" => {
                url.set_host(Some(value)).map_err(|e| e.to_string())?;
                has_host = true;
            }
            "port" => {
                let port = value
                    .parse::<u16>()
                    .map_err(|e| format!("invalid port `{}`: {}", value, e))?;
                url.set_port(Some(port))
                    .map_err(|_| "cannot set port".to_string())?;
            }
            "user id" | "userid" | "uid" | "user" | "username" => {
                url.set_username(value)
                    .map_err(|_| "cannot set user".to_string())?;
            }
            "password" | "pwd" => {
                url.set_password(Some(value))
                    .map_err(|_| "cannot set password".to_string())?;
            }
            "database" | "initial catalog" => {
                url.set_path(&format!("/{}", value.trim_start_matches('/')))
            }
            // tls, pooling and timeout options are left to sqlx defaults
            _ => {}
        }
    }

    if !has_host {
        return Err("no server given".to_string());
    }

    Ok(url.to_string())
}
