use scan_parser::ParserConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidVar { name: &'static str, value: String },

    #[error("Failed to read parser config at {config_path}: {source}")]
    ParserConfigRead {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse parser config at {config_path}: {source}")]
    ParserConfigParse {
        config_path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Parses running longer than this are cancelled.
    pub parse_timeout: Duration,
    pub max_upload_bytes: usize,
    pub parser: ParserConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./data"),
            parse_timeout: Duration::from_secs(10),
            max_upload_bytes: 256 * 1024 * 1024,
            parser: ParserConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from `SCAN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("SCAN_SERVICE_ADDR") {
            config.addr = value.parse().map_err(|_| ConfigError::InvalidVar {
                name: "SCAN_SERVICE_ADDR",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("SCAN_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("SCAN_PARSE_TIMEOUT_MS") {
            let millis: u64 = value.parse().map_err(|_| ConfigError::InvalidVar {
                name: "SCAN_PARSE_TIMEOUT_MS",
                value: value.clone(),
            })?;
            config.parse_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup("SCAN_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = value.parse().map_err(|_| ConfigError::InvalidVar {
                name: "SCAN_MAX_UPLOAD_BYTES",
                value: value.clone(),
            })?;
        }
        if let Some(path) = lookup("SCAN_PARSER_CONFIG") {
            config.parser = Self::load_parser_config(path)?;
        }

        Ok(config)
    }

    /// Read a JSON `ParserConfig`; missing fields take their defaults.
    pub fn load_parser_config<P: AsRef<Path>>(config_path: P) -> Result<ParserConfig, ConfigError> {
        let config_path = config_path.as_ref();
        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ParserConfigRead {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::ParserConfigParse {
            config_path: config_path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_parser::Format;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.parse_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("SCAN_SERVICE_ADDR", "0.0.0.0:9000"),
            ("SCAN_PARSE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.parse_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_timeout() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("SCAN_PARSE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                name: "SCAN_PARSE_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_parser_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parser.json");
        std::fs::write(
            &path,
            r#"{"inferHeaders": false, "associations": [{"pattern": "*.txt", "format": "csv-row"}]}"#,
        )
        .unwrap();

        let config = ServiceConfig::from_lookup(lookup_from(&[(
            "SCAN_PARSER_CONFIG",
            path.to_str().unwrap(),
        )]))
        .unwrap();

        assert!(!config.parser.infer_headers);
        assert_eq!(config.parser.comment_prefix, "#");
        assert_eq!(config.parser.associations[0].format, Format::CsvRows);
    }

    #[test]
    fn test_missing_parser_config_file() {
        let err = ServiceConfig::load_parser_config("/nonexistent/parser.json").unwrap_err();
        assert!(matches!(err, ConfigError::ParserConfigRead { .. }));
    }
}
