//! Index configuration module.
//!
//! This module loads the settings of the `bptree` binary from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_INDEX_PATH`: Index file to open or create (default: `./index.bpt`)
//! - `BPTREE_BLOCK_SIZE`: Block size in bytes for new files (default: `4096`)
//! - `BPTREE_KEY_KIND`: `int` or `string` (default: `int`)
//! - `BPTREE_KEY_WIDTH`: Width of string keys in bytes (default: `20`)
//! - `BPTREE_DEMO_KEYS`: Number of random keys the demo inserts (default: `1000`)
//!
//! # Invariants
//!
//! - `block_size` is never below [`MIN_BLOCK_SIZE`]
//! - `key_format` has a non-zero width

use std::path::PathBuf;

use crate::storage::MIN_BLOCK_SIZE;
use crate::storage::btree::KeyFormat;

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Path of the index file.
    pub index_path: PathBuf,
    /// Block size used when the file has to be created.
    /// An existing file keeps the block size recorded in its header.
    pub block_size: u32,
    /// Key format of the tree.
    pub key_format: KeyFormat,
    /// Number of random keys inserted by the demo workload.
    pub demo_keys: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self::InvalidValue { name, message } = self;
        write!(f, "invalid value for {name}: {message}")
    }
}

impl std::error::Error for ConfigError {}

impl IndexConfig {
    /// Default index file.
    pub const DEFAULT_INDEX_PATH: &'static str = "./index.bpt";
    /// Default block size.
    pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
    /// Default width of string keys.
    pub const DEFAULT_KEY_WIDTH: usize = 20;
    /// Default size of the demo workload.
    pub const DEFAULT_DEMO_KEYS: usize = 1000;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `BPTREE_BLOCK_SIZE` is not a number or is below the minimum block size
    /// - `BPTREE_KEY_KIND` is neither `int` nor `string`
    /// - `BPTREE_KEY_WIDTH` or `BPTREE_DEMO_KEYS` is not a number
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let index_path = lookup("BPTREE_INDEX_PATH")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_INDEX_PATH), PathBuf::from);
        let block_size = Self::load_block_size(lookup("BPTREE_BLOCK_SIZE"))?;
        let key_format =
            Self::load_key_format(lookup("BPTREE_KEY_KIND"), lookup("BPTREE_KEY_WIDTH"))?;
        let demo_keys =
            parse_number("BPTREE_DEMO_KEYS", lookup("BPTREE_DEMO_KEYS"), Self::DEFAULT_DEMO_KEYS)?;

        Ok(Self {
            index_path,
            block_size,
            key_format,
            demo_keys,
        })
    }

    fn load_block_size(value: Option<String>) -> Result<u32, ConfigError> {
        let block_size = parse_number("BPTREE_BLOCK_SIZE", value, Self::DEFAULT_BLOCK_SIZE)?;
        if block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "BPTREE_BLOCK_SIZE".to_string(),
                message: format!("{block_size} is below the minimum of {MIN_BLOCK_SIZE}"),
            });
        }
        Ok(block_size)
    }

    fn load_key_format(
        kind: Option<String>,
        width: Option<String>,
    ) -> Result<KeyFormat, ConfigError> {
        match kind.as_deref() {
            None | Some("int") => Ok(KeyFormat::integer()),
            Some("string") => {
                let width = parse_number("BPTREE_KEY_WIDTH", width, Self::DEFAULT_KEY_WIDTH)?;
                KeyFormat::string(width).map_err(|e| ConfigError::InvalidValue {
                    name: "BPTREE_KEY_WIDTH".to_string(),
                    message: e.to_string(),
                })
            }
            Some(other) => Err(ConfigError::InvalidValue {
                name: "BPTREE_KEY_KIND".to_string(),
                message: format!("'{other}' is not a key kind (expected 'int' or 'string')"),
            }),
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid number"),
        }),
        None => Ok(default),
    }
}
