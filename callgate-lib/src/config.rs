use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::{ErrorKind, Result};

/// Default ceiling on concurrently executing requests
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Default user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = concat!("callgate/", env!("CARGO_PKG_VERSION"));

/// Coordinator settings as they appear in a TOML file.
///
/// ```toml
/// max_concurrent_requests = 20
/// timeout = "30s"
///
/// [headers]
/// accept = "application/json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Maximum number of network calls executing at the same time
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Upper bound for a single network call, including reading the body
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers sent with every request
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            timeout: None,
            user_agent: default_user_agent(),
            headers: HeaderMap::new(),
        }
    }
}

const fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_user_agent() -> String {
    String::from(DEFAULT_USER_AGENT)
}

impl CoordinatorConfig {
    /// Parse and validate a configuration from TOML
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid TOML, contains unknown
    /// keys, or fails [`CoordinatorConfig::validate`].
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| ErrorKind::ParseConfig(Arc::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or for the same reasons
    /// as [`CoordinatorConfig::from_toml`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ErrorKind::ReadConfig(path.to_path_buf(), Arc::new(e)))?;
        log::debug!("Loaded coordinator config from {}", path.display());
        Self::from_toml(&contents)
    }

    /// Check that all values are in range
    ///
    /// # Errors
    ///
    /// Returns an error if the concurrency ceiling or the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        validate_limits(self.max_concurrent_requests, self.timeout)
    }
}

pub(crate) fn validate_limits(max_concurrent_requests: usize, timeout: Option<Duration>) -> Result<()> {
    if max_concurrent_requests == 0 {
        return Err(ErrorKind::InvalidConfig(
            "max_concurrent_requests must be at least 1".to_string(),
        ));
    }
    if timeout == Some(Duration::ZERO) {
        return Err(ErrorKind::InvalidConfig(
            "timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Custom deserializer for headers from TOML config format
fn deserialize_headers<'de, D>(deserializer: D) -> std::result::Result<HeaderMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    let mut header_map = HeaderMap::new();

    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            serde::de::Error::custom(format!("Invalid header value '{value}': {e}"))
        })?;
        header_map.insert(header_name, header_value);
    }

    Ok(header_map)
}

fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<&str, &str> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    map.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use http::header::ACCEPT;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_concurrent_requests, 50);
        assert_eq!(config.timeout, None);
        assert!(config.user_agent.starts_with("callgate/"));
        assert!(config.headers.is_empty());
        assert_eq!(CoordinatorConfig::from_toml("").unwrap(), config);
    }

    #[test]
    fn test_full_config() {
        let config = CoordinatorConfig::from_toml(
            r#"
            max_concurrent_requests = 8
            timeout = "1m 30s"
            user_agent = "dashboard/2.0"

            [headers]
            accept = "application/json"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.user_agent, "dashboard/2.0");
        assert_eq!(config.headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[rstest]
    #[case("max_concurrent_requests = 0", "at least 1")]
    #[case("timeout = \"0s\"", "greater than zero")]
    fn test_out_of_range_values(#[case] input: &str, #[case] message: &str) {
        let err = CoordinatorConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidConfig(_)));
        assert!(err.to_string().contains(message));
    }

    #[rstest]
    #[case("retries = 3")]
    #[case("timeout = \"soon\"")]
    #[case("[headers]\n\"bad header\" = \"x\"")]
    fn test_rejected_input(#[case] input: &str) {
        let err = CoordinatorConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ErrorKind::ParseConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent_requests = 3").unwrap();

        let config = CoordinatorConfig::load(file.path()).unwrap();
        assert_eq!(config.max_concurrent_requests, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CoordinatorConfig::load(dir.path().join("callgate.toml")).unwrap_err();
        assert!(matches!(err, ErrorKind::ReadConfig(..)));
    }

    #[test]
    fn test_serialize_headers() {
        let mut config = CoordinatorConfig::default();
        config
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/plain"));

        let toml = toml::to_string(&config).unwrap();
        assert_eq!(CoordinatorConfig::from_toml(&toml).unwrap(), config);
    }
}
