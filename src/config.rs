//! Client configuration: a small TOML file plus environment overrides.
//!
//! Precedence, lowest to highest: built-in defaults, config file,
//! `QUIZWIRE_BASE_URL`. A CLI `--base-url` flag beats all of these (applied
//! by the caller, not here).

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const ENV_BASE_URL: &str = "QUIZWIRE_BASE_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend API root, without a trailing slash.
    pub base_url: String,
    /// Timeout for plain REST lookups. Streaming calls never time out; a
    /// long-running stream is normal operation.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file, then apply environment overrides. A missing
    /// file is fine (defaults apply); an unreadable or malformed file is an
    /// error, since the user asked for it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str::<ClientConfig>(&text).map_err(|e| {
                    Error::Config(format!("invalid config {}: {}", path.display(), e))
                })?
            }
            Some(path) => {
                return Err(Error::Config(format!("config file not found: {}", path.display())))
            }
            None => ClientConfig::default(),
        };

        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000/api");
        assert_eq!(config.request_timeout_secs, 15);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "base_url = \"http://quiz.internal:9000/api/\"").expect("write");
        writeln!(file, "request_timeout_secs = 30").expect("write");

        let config = ClientConfig::load(Some(file.path())).expect("load");
        // trailing slash stripped
        assert_eq!(config.base_url, "http://quiz.internal:9000/api");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "request_timeout_secs = 5").expect("write");

        let config = ClientConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.base_url, "http://localhost:8000/api");
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = ClientConfig::load(Some(Path::new("/nonexistent/quizwire.toml")))
            .expect_err("should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "base_url = [not a string").expect("write");
        assert!(ClientConfig::load(Some(file.path())).is_err());
    }
}
