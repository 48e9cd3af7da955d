//! Broker configuration.
//!
//! The daemon is configured by a YAML document:
//!
//! ```yaml
//! system:
//!   mode: 0             # 0 = PULL, 1 = PUSH
//!   simulator_mode: 0   # 0 = SYSTEM_WIDE, 1 = PER_NODE
//! database:
//!   use_db: false
//!   db_address: 127.0.0.1   # required when use_db is true
//!   db_port: 6379
//! server:
//!   address: 127.0.0.1      # optional, defaults shown
//!   port: 65432
//! ```

use std::net::IpAddr;
use std::path::Path;

use nsb_core::{SimulatorMode, SystemMode};
use serde::Deserialize;
use thiserror::Error;

/// Default address the daemon binds.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default port the daemon binds.
pub const DEFAULT_SERVER_PORT: u16 = 65432;

/// Errors loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// The file is not a valid YAML document of the expected shape.
    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field held a value outside its accepted range.
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Dotted path of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// `database.use_db` was set without the address or port.
    #[error("database.use_db is true but {field} is missing")]
    MissingDatabaseField {
        /// Dotted path of the missing field.
        field: &'static str,
    },
}

/// Validated broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// PULL or PUSH delivery.
    pub system_mode: SystemMode,
    /// SYSTEM_WIDE or PER_NODE simulator routing.
    pub simulator_mode: SimulatorMode,
    /// Whether payloads are offloaded to the external store.
    pub use_store: bool,
    /// Offload store address (meaningful when `use_store` is set).
    pub store_address: String,
    /// Offload store port.
    pub store_port: u16,
    /// Offload store database number.
    pub store_number: u32,
    /// Address the daemon binds.
    pub bind_address: IpAddr,
    /// Port the daemon binds.
    pub server_port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            system_mode: SystemMode::Pull,
            simulator_mode: SimulatorMode::SystemWide,
            use_store: false,
            store_address: String::new(),
            store_port: 0,
            store_number: 0,
            bind_address: DEFAULT_BIND_ADDRESS.parse().expect("valid default address"),
            server_port: DEFAULT_SERVER_PORT,
        }
    }
}

impl BrokerConfig {
    /// Loads and validates the configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is unreadable, not valid YAML,
    /// or carries out-of-range mode values or an incomplete database block.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a YAML configuration document.
    ///
    /// # Errors
    ///
    /// See [`BrokerConfig::from_file`].
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content)?;

        let system_mode = match raw.system.mode {
            0 => SystemMode::Pull,
            1 => SystemMode::Push,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "system.mode",
                    value: other.to_string(),
                });
            },
        };
        let simulator_mode = match raw.system.simulator_mode {
            0 => SimulatorMode::SystemWide,
            1 => SimulatorMode::PerNode,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "system.simulator_mode",
                    value: other.to_string(),
                });
            },
        };

        let database = raw.database.unwrap_or_default();
        let (store_address, store_port) = if database.use_db {
            let address = database
                .db_address
                .ok_or(ConfigError::MissingDatabaseField {
                    field: "database.db_address",
                })?;
            let port = database.db_port.ok_or(ConfigError::MissingDatabaseField {
                field: "database.db_port",
            })?;
            (address, port)
        } else {
            (String::new(), 0)
        };

        let server = raw.server.unwrap_or_default();
        let bind_address = server
            .address
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned());
        let bind_address: IpAddr =
            bind_address
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "server.address",
                    value: bind_address.clone(),
                })?;

        Ok(Self {
            system_mode,
            simulator_mode,
            use_store: database.use_db,
            store_address,
            store_port,
            store_number: database.db_num.unwrap_or(0),
            bind_address,
            server_port: server.port.unwrap_or(DEFAULT_SERVER_PORT),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    system: RawSystem,
    database: Option<RawDatabase>,
    server: Option<RawServer>,
}

#[derive(Debug, Deserialize)]
struct RawSystem {
    mode: i64,
    simulator_mode: i64,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    #[serde(default)]
    use_db: bool,
    db_address: Option<String>,
    db_port: Option<u16>,
    db_num: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    address: Option<String>,
    port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_pull_config() {
        let cfg = BrokerConfig::from_yaml(
            "system:\n  mode: 0\n  simulator_mode: 0\ndatabase:\n  use_db: false\n",
        )
        .unwrap();

        assert_eq!(cfg.system_mode, SystemMode::Pull);
        assert_eq!(cfg.simulator_mode, SimulatorMode::SystemWide);
        assert!(!cfg.use_store);
        assert_eq!(cfg.server_port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn push_per_node_with_database() {
        let cfg = BrokerConfig::from_yaml(
            "system:\n  mode: 1\n  simulator_mode: 1\n\
             database:\n  use_db: true\n  db_address: 10.0.0.7\n  db_port: 6379\n  db_num: 2\n",
        )
        .unwrap();

        assert_eq!(cfg.system_mode, SystemMode::Push);
        assert_eq!(cfg.simulator_mode, SimulatorMode::PerNode);
        assert!(cfg.use_store);
        assert_eq!(cfg.store_address, "10.0.0.7");
        assert_eq!(cfg.store_port, 6379);
        assert_eq!(cfg.store_number, 2);
    }

    #[test]
    fn out_of_range_mode_is_rejected() {
        let err = BrokerConfig::from_yaml("system:\n  mode: 3\n  simulator_mode: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "system.mode",
                ..
            }
        ));
    }

    #[test]
    fn use_db_requires_address_and_port() {
        let err = BrokerConfig::from_yaml(
            "system:\n  mode: 0\n  simulator_mode: 0\ndatabase:\n  use_db: true\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingDatabaseField {
                field: "database.db_address",
            }
        ));
    }

    #[test]
    fn server_overrides_apply() {
        let cfg = BrokerConfig::from_yaml(
            "system:\n  mode: 0\n  simulator_mode: 0\nserver:\n  address: 0.0.0.0\n  port: 7000\n",
        )
        .unwrap();
        assert_eq!(cfg.bind_address.to_string(), "0.0.0.0");
        assert_eq!(cfg.server_port, 7000);
    }

    #[test]
    fn garbage_yaml_is_a_parse_error() {
        assert!(matches!(
            BrokerConfig::from_yaml(": not yaml : ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
