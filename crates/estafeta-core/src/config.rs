use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level broker configuration, deserializable from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub store: StoreConfig,
    pub rpc: RpcConfig,
}

/// Which persistence backend the manager runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Disk {
        #[serde(default = "default_store_path")]
        path: PathBuf,
        #[serde(default)]
        fsync: bool,
    },
    Mysql {
        host: String,
        username: String,
        password: String,
        database: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

/// RPC endpoint configuration. The server binds the loopback interface
/// only; the ACL further restricts which peers may talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub port: u16,
    /// Space-separated `allow <host>` / `deny <host>` rules, e.g.
    /// `"allow 127.0.0.1 deny all"`. Empty means allow everyone.
    pub acl: String,
}

impl RpcConfig {
    pub const DEFAULT_PORT: u16 = 6438;
}

fn default_store_path() -> PathBuf {
    PathBuf::from("queues")
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Disk {
            path: default_store_path(),
            fsync: false,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            acl: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BrokerConfig::default();
        match config.store {
            StoreConfig::Disk { path, fsync } => {
                assert_eq!(path, PathBuf::from("queues"));
                assert!(!fsync);
            }
            StoreConfig::Mysql { .. } => panic!("default store should be disk"),
        }
        assert_eq!(config.rpc.port, 6438);
        assert!(config.rpc.acl.is_empty());
    }

    #[test]
    fn yaml_parsing_with_overrides() {
        let yaml = r#"
store:
  type: disk
  path: /var/spool/estafeta
  fsync: true
rpc:
  port: 7000
  acl: "allow 127.0.0.1 deny all"
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        match config.store {
            StoreConfig::Disk { path, fsync } => {
                assert_eq!(path, PathBuf::from("/var/spool/estafeta"));
                assert!(fsync);
            }
            StoreConfig::Mysql { .. } => panic!("expected disk store"),
        }
        assert_eq!(config.rpc.port, 7000);
        assert_eq!(config.rpc.acl, "allow 127.0.0.1 deny all");
    }

    #[test]
    fn yaml_parsing_mysql_store() {
        let yaml = r#"
store:
  type: mysql
  host: db.internal
  username: broker
  password: secret
  database: queues
  prefix: est_
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        match config.store {
            StoreConfig::Mysql {
                host,
                username,
                database,
                port,
                prefix,
                ..
            } => {
                assert_eq!(host, "db.internal");
                assert_eq!(username, "broker");
                assert_eq!(database, "queues");
                assert_eq!(port, None);
                assert_eq!(prefix.as_deref(), Some("est_"));
            }
            StoreConfig::Disk { .. } => panic!("expected mysql store"),
        }
        // rpc section omitted entirely: defaults apply
        assert_eq!(config.rpc.port, 6438);
    }

    #[test]
    fn yaml_parsing_empty_uses_defaults() {
        let config: BrokerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.rpc.port, 6438);
        assert!(matches!(config.store, StoreConfig::Disk { .. }));
    }

    #[test]
    fn config_serializes_back_to_yaml() {
        let config = BrokerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: BrokerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.rpc.port, config.rpc.port);
    }
}
