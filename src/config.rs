use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub jwt: JwtConfig,
    pub analyzer: AnalyzerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address; port comes from `PORT` (default 4000).
    pub bind_address: SocketAddr,

    /// CORS allowed origins (empty = allow any).
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub broker: String,

    /// Consumer group shared across replicas so partitions divide the work.
    pub consumer_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Base URL of the moderation/sentiment service.
    pub base_url: String,

    /// Shared secret sent on every analyzer request.
    pub shared_secret: String,

    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = env_or("PORT", "4000")
            .parse()
            .context("PORT must be a valid port number")?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            server: ServerConfig {
                bind_address: SocketAddr::from(([0, 0, 0, 0], port)),
                cors_origins,
            },
            database: DatabaseConfig {
                database_url: env_or("DATABASE_URL", "sqlite:relaychat.db?mode=rwc"),
            },
            redis: RedisConfig {
                redis_url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            },
            kafka: KafkaConfig {
                broker: env::var("KAFKA_BROKER").context("KAFKA_BROKER must be set")?,
                consumer_group: env_or("KAFKA_CONSUMER_GROUP", "relaychat-pipeline"),
            },
            jwt: JwtConfig {
                access_secret: env::var("JWT_ACCESS_SECRET")
                    .context("JWT_ACCESS_SECRET must be set")?,
                refresh_secret: env::var("JWT_REFRESH_SECRET")
                    .context("JWT_REFRESH_SECRET must be set")?,
                access_ttl: parse_ttl(&env_or("JWT_ACCESS_TTL", "900s"))
                    .context("JWT_ACCESS_TTL is not a valid duration")?,
                refresh_ttl: parse_ttl(&env_or("JWT_REFRESH_TTL", "7d"))
                    .context("JWT_REFRESH_TTL is not a valid duration")?,
            },
            analyzer: AnalyzerConfig {
                // FASTAPI_URL is the name older deployments used.
                base_url: env::var("ANALYZER_URL")
                    .or_else(|_| env::var("FASTAPI_URL"))
                    .context("ANALYZER_URL must be set")?,
                shared_secret: env::var("SERVICE_SHARED_SECRET")
                    .context("SERVICE_SHARED_SECRET must be set")?,
                request_timeout: Duration::from_secs(5),
            },
            logging: LoggingConfig {
                level: env_or("LOG_LEVEL", "info"),
                format: match env_or("LOG_FORMAT", "pretty").as_str() {
                    "json" => LogFormat::Json,
                    "compact" => LogFormat::Compact,
                    _ => LogFormat::Pretty,
                },
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse durations like `900s`, `15m`, `12h`, `7d`. A bare number is seconds.
fn parse_ttl(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().with_context(|| format!("bad duration: {raw}"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        other => anyhow::bail!("unknown duration unit: {other}"),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_units_parse() {
        assert_eq!(parse_ttl("900s").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_ttl("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_ttl("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("42").unwrap(), Duration::from_secs(42));
        assert!(parse_ttl("10y").is_err());
    }
}
