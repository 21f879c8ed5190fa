//! Configuration management for Chainge

use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub api_port: u16,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: usize,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_dh_bits")]
    pub dh_bits: usize,
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            dh_bits: default_dh_bits(),
            rsa_bits: default_rsa_bits(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2
}

fn default_poll_attempts() -> usize {
    30
}

fn default_db_path() -> String {
    "./chainge.db".to_string()
}

fn default_k() -> usize {
    crate::protocol::DEFAULT_K
}

fn default_dh_bits() -> usize {
    crate::protocol::DEFAULT_DH_BITS
}

fn default_rsa_bits() -> usize {
    crate::crypto::DEFAULT_RSA_BITS
}

pub fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        // Sane defaults when the config file is absent
        Config {
            network: NetworkConfig {
                api_port: 3000,
                peers: Vec::new(),
                poll_interval_secs: default_poll_interval(),
                poll_attempts: default_poll_attempts(),
            },
            database: DatabaseConfig {
                path: default_db_path(),
            },
            protocol: ProtocolConfig::default(),
        }
    } else {
        toml::from_str(&config_str)?
    };

    // Validate critical values
    if config.database.path.is_empty() {
        return Err("database.path must be set".into());
    }
    if config.protocol.k == 0 {
        return Err("protocol.k must be at least 1".into());
    }
    if config.protocol.dh_bits < 16 {
        return Err("protocol.dh_bits is too small".into());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/chainge.toml").unwrap();
        assert_eq!(config.network.api_port, 3000);
        assert_eq!(config.network.poll_interval_secs, 2);
        assert_eq!(config.protocol.k, crate::protocol::DEFAULT_K);
    }

    #[test]
    fn test_parse_and_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
api_port = 4000
peers = ["http://peer-a:3000"]

[database]
path = "/tmp/chainge-test.db"

[protocol]
k = 5
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.network.api_port, 4000);
        assert_eq!(config.network.peers, vec!["http://peer-a:3000".to_string()]);
        assert_eq!(config.protocol.k, 5);
        assert_eq!(config.protocol.dh_bits, crate::protocol::DEFAULT_DH_BITS);
    }

    #[test]
    fn test_invalid_k_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[network]
api_port = 4000

[database]
path = "/tmp/chainge-test.db"

[protocol]
k = 0
"#
        )
        .unwrap();

        assert!(load_config(file.path().to_str().unwrap()).is_err());
    }
}
