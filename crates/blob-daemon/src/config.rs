use std::{env, net::SocketAddr};

use anyhow::{bail, Context, Result};
use blob_storage::MongoConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8887";

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Mongo(MongoConfig),
    /// Blobs kept in process memory; lost on exit.
    Memory,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let listen_addr = parse_listen_addr(
            var("BLOB_HTTP_ADDR")
                .as_deref()
                .unwrap_or(DEFAULT_LISTEN_ADDR),
        )?;

        let backend_name = var("BLOB_STORAGE_BACKEND").map(|name| name.to_ascii_lowercase());
        let backend = match backend_name.as_deref() {
            None | Some("mongo") => {
                let defaults = MongoConfig::default();
                BackendConfig::Mongo(MongoConfig {
                    url: var("BLOB_MONGO_URL").unwrap_or(defaults.url),
                    prefix: var("BLOB_MONGO_PREFIX").unwrap_or(defaults.prefix),
                    database: var("BLOB_MONGO_DATABASE"),
                })
            }
            Some("memory") => BackendConfig::Memory,
            Some(other) => {
                bail!("unknown BLOB_STORAGE_BACKEND '{other}' (expected 'mongo' or 'memory')")
            }
        };

        Ok(Self {
            listen_addr,
            backend,
        })
    }
}

/// Accepts `host:port`, or `:port` for every interface.
fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let normalized = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .with_context(|| format!("invalid BLOB_HTTP_ADDR '{raw}'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_target_local_mongo() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8887".parse().unwrap());
        match config.backend {
            BackendConfig::Mongo(mongo) => {
                assert_eq!(mongo.url, "localhost");
                assert_eq!(mongo.prefix, "fs");
                assert!(mongo.database.is_none());
            }
            BackendConfig::Memory => panic!("expected mongo backend"),
        }
    }

    #[test]
    fn mongo_settings_are_read() {
        let config = config_from(&[
            ("BLOB_HTTP_ADDR", "127.0.0.1:9000"),
            ("BLOB_MONGO_URL", "mongodb://db:27017"),
            ("BLOB_MONGO_PREFIX", "uploads"),
            ("BLOB_MONGO_DATABASE", "blobs"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        let BackendConfig::Mongo(mongo) = config.backend else {
            panic!("expected mongo backend");
        };
        assert_eq!(mongo.url, "mongodb://db:27017");
        assert_eq!(mongo.prefix, "uploads");
        assert_eq!(mongo.database.as_deref(), Some("blobs"));
    }

    #[test]
    fn port_only_address_listens_everywhere() {
        let config = config_from(&[("BLOB_HTTP_ADDR", ":5555")]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5555".parse().unwrap());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("BLOB_MONGO_PREFIX", "  "), ("BLOB_HTTP_ADDR", "")]).unwrap();
        assert_eq!(config.listen_addr.port(), 8887);
        let BackendConfig::Mongo(mongo) = config.backend else {
            panic!("expected mongo backend");
        };
        assert_eq!(mongo.prefix, "fs");
    }

    #[test]
    fn memory_backend_is_selectable() {
        let config = config_from(&[("BLOB_STORAGE_BACKEND", "Memory")]).unwrap();
        assert!(matches!(config.backend, BackendConfig::Memory));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = config_from(&[("BLOB_STORAGE_BACKEND", "s3")]).unwrap_err();
        assert!(err.to_string().contains("unknown BLOB_STORAGE_BACKEND 's3'"));

        let err = config_from(&[("BLOB_HTTP_ADDR", "nowhere")]).unwrap_err();
        assert!(err.to_string().contains("invalid BLOB_HTTP_ADDR 'nowhere'"));
    }
}
