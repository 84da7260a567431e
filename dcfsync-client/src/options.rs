use std::{path::Path, time::Duration};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Error returned when loading run option files
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// Path of the file
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML, or contains unknown fields
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// The underlying error
        source: toml::de::Error,
    },
}

const fn default_sdo_timeout_ms() -> u64 {
    100
}

const fn default_max_consecutive_timeouts() -> usize {
    5
}

/// Options controlling a synchronization run
///
/// Options can be loaded from a TOML file, e.g.:
///
/// ```toml
/// sdo_timeout_ms = 250
/// max_consecutive_timeouts = 3
/// ```
///
/// Missing fields take their default values.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncOptions {
    /// Time to wait for each SDO response, in milliseconds
    #[serde(default = "default_sdo_timeout_ms")]
    pub sdo_timeout_ms: u64,
    /// Number of consecutive SDO timeouts after which the device is considered lost
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sdo_timeout_ms: default_sdo_timeout_ms(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
        }
    }
}

impl SyncOptions {
    /// Read options from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<SyncOptions, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read options from a TOML string
    pub fn load_from_str(s: &str) -> Result<SyncOptions, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }

    /// The SDO response timeout
    pub fn sdo_timeout(&self) -> Duration {
        Duration::from_millis(self.sdo_timeout_ms)
    }
}
