//! Configuration file loading and merging

use super::builtin;
use super::schema::Config;
use crate::error::{Result, WardenError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find the user config by checking the environment and standard locations
    pub fn find_user_config() -> Option<PathBuf> {
        // 1. $LANWARDEN_CONFIG
        if let Ok(path) = env::var("LANWARDEN_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. $XDG_CONFIG_HOME/lanwarden/config.toml
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("lanwarden/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/lanwarden/config.toml
        if let Ok(home) = env::var("HOME") {
            let p = PathBuf::from(home).join(".config/lanwarden/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    /// Read a config file as a raw table
    pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Table> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| WardenError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load a config file on its own, without builtin defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        Self::into_config(Self::read_table(path)?)
    }

    pub fn load_builtin() -> Result<Config> {
        Self::into_config(builtin::get_builtin_table().clone())
    }

    /// Deep-merge `overlay` onto `base`: nested tables merge key by key,
    /// every other value (including arrays) is replaced.
    pub fn merge_tables(mut base: Table, overlay: Table) -> Table {
        for (key, value) in overlay {
            match (base.remove(&key), value) {
                (Some(Value::Table(base_inner)), Value::Table(overlay_inner)) => {
                    base.insert(key, Value::Table(Self::merge_tables(base_inner, overlay_inner)));
                }
                (_, value) => {
                    base.insert(key, value);
                }
            }
        }
        base
    }

    /// Load config with builtin defaults underneath.
    /// Priority: explicit path > user config > builtin.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        let builtin = builtin::get_builtin_table().clone();

        let user_path = path.or_else(Self::find_user_config);
        let merged = match user_path {
            Some(p) => {
                tracing::debug!("Loading config from {:?}", p);
                Self::merge_tables(builtin, Self::read_table(&p)?)
            }
            None => {
                tracing::debug!("No user config found, using built-in defaults");
                builtin
            }
        };

        Self::into_config(merged)
    }

    fn into_config(table: Table) -> Result<Config> {
        Ok(Value::Table(table).try_into()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.proxy.listen.port(), 3128);
        assert_eq!(config.discovery.subnet_prefix, "192.168.1");
        assert!(config.proxy.max_connections.is_none());
    }

    #[test]
    fn test_user_file_merges_over_builtin() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[proxy]
listen = "127.0.0.1:8888"
max_connections = 64

[parental]
blocked_categories = ["casino"]
"#
        )
        .unwrap();

        let config = ConfigLoader::load_or_default(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.proxy.listen.port(), 8888);
        assert_eq!(config.proxy.max_connections, Some(64));
        // Untouched keys in a merged table keep their builtin values
        assert_eq!(config.proxy.connect_timeout_ms, 10_000);
        assert_eq!(config.parental.vpn_ports, vec![1194, 51820, 500, 4500]);
        assert_eq!(config.parental.blocked_categories, vec!["casino"]);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = ConfigLoader::load_or_default(Some(PathBuf::from("/nonexistent/lanwarden.toml")));
        assert!(matches!(result, Err(WardenError::ConfigLoad { .. })));
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let base: Table = toml::from_str("a = [1, 2]\n[t]\nx = 1\ny = 2").unwrap();
        let overlay: Table = toml::from_str("a = [3]\n[t]\ny = 5").unwrap();
        let merged = ConfigLoader::merge_tables(base, overlay);

        assert_eq!(merged["a"], Value::Array(vec![Value::Integer(3)]));
        assert_eq!(merged["t"]["x"], Value::Integer(1));
        assert_eq!(merged["t"]["y"], Value::Integer(5));
    }
}
