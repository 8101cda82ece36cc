use anyhow::{anyhow, Context};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::adjust::AdjustPolicy;

const DEFAULT_DATABASE_URL: &str = "sqlite://study_planner.db?mode=rwc";
const MEMORY_DATABASE_URL: &str = "sqlite::memory:";
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "testing" | "test" => Ok(Environment::Testing),
            other => Err(anyhow!("unknown APP_ENV '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub adjust_policy: AdjustPolicy,
    pub token_ttl_hours: i64,
}

impl Config {
    /// Reads configuration from the process environment (after `.env` is loaded).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV") {
            Some(v) => v.parse()?,
            None => Environment::Development,
        };

        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| match environment {
            Environment::Testing => MEMORY_DATABASE_URL.to_string(),
            _ => DEFAULT_DATABASE_URL.to_string(),
        });

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:5000".to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address like 127.0.0.1:5000")?;

        let adjust_policy = match lookup("ADJUST_POLICY") {
            Some(v) => v.parse::<AdjustPolicy>().map_err(|e| anyhow!(e))?,
            None => AdjustPolicy::default(),
        };

        let token_ttl_hours = match lookup("TOKEN_TTL_HOURS") {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .context("TOKEN_TTL_HOURS must be an integer")?,
            None => 24,
        };
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            return Err(anyhow!("TOKEN_TTL_HOURS must be between 1 and {}", MAX_TOKEN_TTL_HOURS));
        }

        Ok(Config {
            environment,
            database_url,
            bind_addr,
            adjust_policy,
            token_ttl_hours,
        })
    }
}
