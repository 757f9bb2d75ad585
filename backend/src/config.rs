use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BIND_ADDR {value:?}: {source}")]
    BindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid EVENT_CHANNEL_CAPACITY {0:?}: expected a positive integer")]
    ChannelCapacity(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    // in-memory only when unset
    pub persist_path: Option<PathBuf>,
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            persist_path: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_value = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_value
            .parse::<SocketAddr>()
            .map_err(|source| ConfigError::BindAddr {
                value: bind_value.clone(),
                source,
            })?;

        let persist_path = lookup("PERSIST_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let channel_capacity = match lookup("EVENT_CHANNEL_CAPACITY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::ChannelCapacity(raw)),
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self {
            bind_addr,
            persist_path,
            channel_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = Config::from_lookup(lookup_from(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("PERSIST_PATH", "/tmp/santa.json"),
            ("EVENT_CHANNEL_CAPACITY", "64"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.persist_path, Some(PathBuf::from("/tmp/santa.json")));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup_from(&[("BIND_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::BindAddr { .. }));

        let err =
            Config::from_lookup(lookup_from(&[("EVENT_CHANNEL_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ChannelCapacity(_)));
    }

    #[test]
    fn blank_persist_path_means_memory_only() {
        let config = Config::from_lookup(lookup_from(&[("PERSIST_PATH", "  ")])).unwrap();
        assert_eq!(config.persist_path, None);
    }
}
