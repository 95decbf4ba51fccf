//! Built-in default configuration embedded in the binary
//!
//! The builtin configuration is the lowest-priority layer. It is parsed on
//! first access and cached.

use std::sync::LazyLock;
use toml::Table;

const BUILTIN_TOML: &str = include_str!("../builtin-config.toml");

static BUILTIN_TABLE: LazyLock<Table> = LazyLock::new(load_builtin_table);

/// Builtin configuration as a raw TOML table, ready for merging
pub fn get_builtin_table() -> &'static Table {
    &BUILTIN_TABLE
}

fn load_builtin_table() -> Table {
    toml::from_str(BUILTIN_TOML).expect("Failed to parse builtin configuration")
}
