use std::{env, net::SocketAddr, str::FromStr};

use log::LevelFilter;

use crate::error::TypeError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: SocketAddr,
    pub jwt_secret: Vec<u8>,
    pub max_connections: u32,
    pub log_level: LevelFilter,
}

impl Config {
    /// Reads the configuration from the environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, TypeError> {
        // a missing .env file is fine, the variables may come from the real environment
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TypeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| TypeError::new("DATABASE_URL is not set"))?;
        let jwt_secret =
            lookup("JWT_SECRET").ok_or_else(|| TypeError::new("JWT_SECRET is not set"))?;

        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:8000")?;
        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", "5")?;
        let log_level = parse_or(&lookup, "LOG_LEVEL", "info")?;

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret: jwt_secret.into_bytes(),
            max_connections,
            log_level,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, TypeError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse()
        .map_err(|_| TypeError::new(&format!("Invalid value for {key}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/foodgram"),
            ("JWT_SECRET", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address.port(), 8000);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.jwt_secret, b"hunter2".to_vec());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(Config::from_lookup(lookup_from(&[("JWT_SECRET", "x")])).is_err());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/foodgram"),
            ("JWT_SECRET", "x"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ]));
        assert!(result.is_err());
    }
}
