//! Configuration file loading for the analysis engines.
//!
//! Both engines read their tunables from one TOML file with a `[local]`
//! and an `[external]` table. Every field has a default, so an empty or
//! missing file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Settings for the in-process search engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// Number of transposition table slots.
    #[serde(default = "default_tt_capacity")]
    pub tt_capacity: usize,
    /// Depth cap used when a request carries no depth, time or node bound.
    #[serde(default = "default_depth")]
    pub default_depth: u32,
}

fn default_tt_capacity() -> usize {
    1 << 20
}

fn default_depth() -> u32 {
    6
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            tt_capacity: default_tt_capacity(),
            default_depth: default_depth(),
        }
    }
}

/// Settings for driving an external UCI engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ExternalConfig {
    /// Path to the engine executable. Defaults to "stockfish" (assumes it's in PATH).
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Bound on each handshake step (identification, `uciok`, `readyok`).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Bound on waiting for `bestmove` when the search has no time limit.
    #[serde(default = "default_bestmove_timeout_ms")]
    pub bestmove_timeout_ms: u64,
    /// Slack granted past `movetime`, and after a forced `stop`.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// How long `close` waits for the process before killing it.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    /// Output lines buffered for handshake waiters.
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("stockfish")
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_bestmove_timeout_ms() -> u64 {
    30_000
}

fn default_stop_grace_ms() -> u64 {
    1000
}

fn default_close_grace_ms() -> u64 {
    2000
}

fn default_line_buffer() -> usize {
    256
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            args: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            bestmove_timeout_ms: default_bestmove_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            close_grace_ms: default_close_grace_ms(),
            line_buffer: default_line_buffer(),
        }
    }
}

impl ExternalConfig {
    /// Configuration for the executable at `path` with default timeouts.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn bestmove_timeout(&self) -> Duration {
        Duration::from_millis(self.bestmove_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Top-level configuration file.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub external: ExternalConfig,
}

impl EngineConfig {
    /// Loads the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file cannot be read,
    /// or [`ConfigError::ParseError`] if the file contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[local]
tt_capacity = 4096
default_depth = 4

[external]
path = "/usr/bin/stockfish"
args = ["--threads", "2"]
handshake_timeout_ms = 750
bestmove_timeout_ms = 9000
stop_grace_ms = 250
close_grace_ms = 500
line_buffer = 64
"#;

        let config: EngineConfig = toml::from_str(toml_content).unwrap();

        assert_eq!(config.local.tt_capacity, 4096);
        assert_eq!(config.local.default_depth, 4);

        let ext = &config.external;
        assert_eq!(ext.path, PathBuf::from("/usr/bin/stockfish"));
        assert_eq!(ext.args, vec!["--threads", "2"]);
        assert_eq!(ext.handshake_timeout(), Duration::from_millis(750));
        assert_eq!(ext.bestmove_timeout(), Duration::from_millis(9000));
        assert_eq!(ext.stop_grace(), Duration::from_millis(250));
        assert_eq!(ext.close_grace(), Duration::from_millis(500));
        assert_eq!(ext.line_buffer, 64);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EngineConfig = toml::from_str("[external]\npath = \"/opt/engine\"\n").unwrap();

        assert_eq!(config.local, LocalConfig::default());
        assert_eq!(config.local.tt_capacity, 1 << 20);
        assert_eq!(config.local.default_depth, 6);
        assert_eq!(config.external.path, PathBuf::from("/opt/engine"));
        assert_eq!(config.external.handshake_timeout_ms, 5000);
        assert_eq!(config.external.close_grace_ms, 2000);
        assert_eq!(config.external.line_buffer, 256);
    }

    #[test]
    fn test_empty_config() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.external.path, PathBuf::from("stockfish"));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[local\ntt_capacity = 1").unwrap();

        let result = EngineConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[local]\ndefault_depth = 3").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.local.default_depth, 3);
        assert_eq!(config.local.tt_capacity, 1 << 20);
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("analysis.toml");

        assert!(matches!(
            EngineConfig::load(&missing),
            Err(ConfigError::ReadError(_))
        ));
        assert_eq!(
            EngineConfig::load_or_default(&missing).unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_builder_helpers() {
        let ext = ExternalConfig::new("/bin/sh").with_args(["stub.sh"]);
        assert_eq!(ext.path, PathBuf::from("/bin/sh"));
        assert_eq!(ext.args, vec!["stub.sh"]);
        assert_eq!(ext.stop_grace_ms, 1000);
    }
}
