//! TOML configuration loading shared by the lfsmon binaries.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// Parsed fine but a value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A configuration section tree that can be loaded from TOML.
pub trait Config: Serialize + DeserializeOwned + Default {
    /// Check cross-field constraints after parsing.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The defaults rendered as TOML, for `--dump-default-config`.
    fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }
}

/// Shorthand for `Err(ConfigError::Invalid(..))`.
pub fn invalid<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Sample {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        name: String,
    }

    impl Config for Sample {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.port == 0 {
                return invalid("port must be non-zero");
            }
            Ok(())
        }
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 8888\nname = \"x\"").unwrap();
        let config = Sample::load(file.path()).unwrap();
        assert_eq!(config.port, 8888);
        assert_eq!(config.name, "x");
    }

    #[test]
    fn test_validation_failure() {
        let err = Sample::from_toml_str("name = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_parse_failure() {
        assert!(matches!(
            Sample::from_toml_str("port = \"not a number\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Sample::load("/nonexistent/lfsmon.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_default_toml() {
        let rendered = Sample::default_toml().unwrap();
        assert!(rendered.contains("port = 0"));
    }
}
