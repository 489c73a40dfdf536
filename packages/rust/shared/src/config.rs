//! Application configuration for geozip.
//!
//! User config lives at `~/.geozip/geozip.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! The provider credential is never stored in the file: the config names the
//! environment variable that holds it, and [`resolve_credential`] reads it
//! exactly once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeozipError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "geozip.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".geozip";

// ---------------------------------------------------------------------------
// Config structs (matching geozip.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reverse-geocoding provider settings.
    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// Per-lookup retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Scheduling settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Input file format.
    #[serde(default)]
    pub input: InputConfig,

    /// Output file format.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[geocoder]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Reverse address search endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Provider API version sent with every request.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Language/locale hint for returned addresses.
    #[serde(default = "default_language")]
    pub language: String,

    /// Name of the env var holding the subscription key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Upper bound on a single request attempt, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            language: default_language(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GeocoderConfig {
    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_endpoint() -> String {
    "https://atlas.microsoft.com/search/address/reverse/json".into()
}
fn default_api_version() -> String {
    "1.0".into()
}
fn default_language() -> String {
    "en-US".into()
}
fn default_api_key_env() -> String {
    "AZURE_MAPS_KEY".into()
}
fn default_timeout_secs() -> u64 {
    10
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per lookup, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each subsequent retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard cap on simultaneously in-flight lookups.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    10
}

/// `[input]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Single-character field separator.
    #[serde(default = "default_input_delimiter")]
    pub delimiter: String,

    /// Text encoding label (WHATWG label, e.g. `latin1`, `utf-8`).
    #[serde(default = "default_input_encoding")]
    pub encoding: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delimiter: default_input_delimiter(),
            encoding: default_input_encoding(),
        }
    }
}

fn default_input_delimiter() -> String {
    ";".into()
}
fn default_input_encoding() -> String {
    "latin1".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Single-character field separator for the enriched file.
    #[serde(default = "default_output_delimiter")]
    pub delimiter: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            delimiter: default_output_delimiter(),
        }
    }
}

fn default_output_delimiter() -> String {
    ",".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject values that would make a run meaningless before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrency == 0 {
            return Err(GeozipError::config(
                "pipeline.max_concurrency must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(GeozipError::config("retry.max_attempts must be at least 1"));
        }
        if self.geocoder.timeout_secs == 0 {
            return Err(GeozipError::config("geocoder.timeout_secs must be at least 1"));
        }
        delimiter_byte(&self.input.delimiter)?;
        delimiter_byte(&self.output.delimiter)?;
        Ok(())
    }
}

/// Convert a configured delimiter string into the single byte the CSV layer expects.
pub fn delimiter_byte(delimiter: &str) -> Result<u8> {
    let unescaped = if delimiter == "\\t" { "\t" } else { delimiter };
    match unescaped.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(GeozipError::config(format!(
            "delimiter must be a single ASCII character, got {delimiter:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Provider subscription key, resolved once at startup and immutable afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw key value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key, for building requests.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Build a credential from an env var lookup result.
    fn from_env_value(var_name: &str, value: Option<String>) -> Result<Self> {
        match value {
            Some(val) if !val.trim().is_empty() => Ok(Self(val.trim().to_string())),
            _ => Err(GeozipError::config(format!(
                "geocoding subscription key not found. Set the {var_name} environment variable \
                 (a .env file in the working directory is also read)."
            ))),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Read the subscription key named by `config.api_key_env`.
///
/// A missing or empty key is a fatal configuration error: the run must not start.
pub fn resolve_credential(config: &GeocoderConfig) -> Result<Credential> {
    let var_name = &config.api_key_env;
    Credential::from_env_value(var_name, std::env::var(var_name).ok())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.geozip/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| GeozipError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.geozip/geozip.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GeozipError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GeozipError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GeozipError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GeozipError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GeozipError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_concurrency"));
        assert!(toml_str.contains("AZURE_MAPS_KEY"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.max_concurrency, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, 1000);
        assert_eq!(config.geocoder.timeout(), Duration::from_secs(10));
        assert_eq!(config.input.delimiter, ";");
        assert_eq!(config.input.encoding, "latin1");
        assert_eq!(config.output.delimiter, ",");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_concurrency = 4

[retry]
backoff_base_ms = 250
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert_eq!(config.retry.backoff_base_ms, 250);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.geocoder.language, "en-US");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.max_concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn delimiter_parsing() {
        assert_eq!(delimiter_byte(";").unwrap(), b';');
        assert_eq!(delimiter_byte("\\t").unwrap(), b'\t');
        assert!(delimiter_byte(";;").is_err());
        assert!(delimiter_byte("").is_err());
        assert!(delimiter_byte("§").is_err());
    }

    #[test]
    fn credential_missing_is_config_error() {
        let result = Credential::from_env_value("GZ_TEST_KEY", None);
        let err = result.unwrap_err();
        assert!(matches!(err, GeozipError::Config { .. }));
        assert!(err.to_string().contains("GZ_TEST_KEY"));

        assert!(Credential::from_env_value("GZ_TEST_KEY", Some("   ".into())).is_err());
    }

    #[test]
    fn credential_is_trimmed_and_redacted() {
        let cred = Credential::from_env_value("GZ_TEST_KEY", Some(" secret \n".into())).unwrap();
        assert_eq!(cred.expose(), "secret");
        assert_eq!(format!("{cred:?}"), "Credential(***)");
    }

    #[test]
    fn resolve_credential_unset_var() {
        let config = GeocoderConfig {
            // Use a unique env var name to avoid interfering with other tests
            api_key_env: "GZ_TEST_NONEXISTENT_KEY_12345".into(),
            ..GeocoderConfig::default()
        };
        let result = resolve_credential(&config);
        assert!(result.unwrap_err().to_string().contains("key not found"));
    }
}
