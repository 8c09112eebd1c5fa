//! Configuration loading helper functions
//!
//! JSON file merged with prefixed environment variables through figment.

use errors::{ModqttError, ModqttResult};
use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Build the provider chain for a JSON file with environment overrides
///
/// Priority (highest to lowest):
/// 1. Environment variables starting with `env_prefix` (prefix stripped, lowercased)
/// 2. The JSON file
pub fn json_with_env(path: &Path, env_prefix: &str) -> Figment {
    Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed(env_prefix))
}

/// Load a JSON configuration file with environment overrides
///
/// Unlike figment's own file provider, a missing file is an error here.
pub fn load_json_config<T>(path: &Path, env_prefix: &str) -> ModqttResult<T>
where
    T: DeserializeOwned,
{
    if !path.is_file() {
        return Err(ModqttError::FileNotFound(path.display().to_string()));
    }
    debug!("Loading configuration from {}", path.display());

    json_with_env(path, env_prefix)
        .extract()
        .map_err(|e| ModqttError::ParseError {
            file: path.display().to_string(),
            error: e.to_string(),
        })
}

/// Extract only the environment variables starting with `prefix`
pub fn load_env_config<T>(prefix: &str) -> ModqttResult<T>
where
    T: DeserializeOwned,
{
    Ok(Figment::new().merge(Env::prefixed(prefix)).extract()?)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        host: String,
        port: u16,
    }

    #[test]
    fn test_load_json_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "10.0.0.5", "port": 502}}"#).unwrap();

        let sample: Sample = load_json_config(file.path(), "MODQTT_LOADER_TEST_A_").unwrap();
        assert_eq!(sample.host, "10.0.0.5");
        assert_eq!(sample.port, 502);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "10.0.0.5", "port": 502}}"#).unwrap();

        std::env::set_var("MODQTT_LOADER_TEST_B_PORT", "1502");
        let sample: Sample = load_json_config(file.path(), "MODQTT_LOADER_TEST_B_").unwrap();
        std::env::remove_var("MODQTT_LOADER_TEST_B_PORT");

        assert_eq!(sample.port, 1502);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_json_config::<Sample>(&dir.path().join("nope.json"), "X_")
            .unwrap_err();
        assert!(matches!(err, ModqttError::FileNotFound(_)));
    }

    #[test]
    fn test_wrong_field_type() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "10.0.0.5", "port": "five"}}"#).unwrap();

        let err = load_json_config::<Sample>(file.path(), "MODQTT_LOADER_TEST_C_").unwrap_err();
        assert!(matches!(err, ModqttError::ParseError { .. }));
    }
}
