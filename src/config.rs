//! Client configuration
//!
//! Read from a TOML file:
//!
//! ```toml
//! server_url = "https://portal.example.com"
//! dataspace = "good-loop"
//! autosave = true
//! autosave_delay_ms = 1500
//!
//! [[types]]
//! name = "Advert"
//!
//! [[types]]
//! name = "NGO"
//! endpoint = "charity"
//! ```

use std::path::Path as FsPath;

use serde::Deserialize;
use thiserror::Error;

use crate::data::registry::{TypeRegistry, TypeSpec};
use crate::io::ClientConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL of the backend
    pub server_url: String,
    /// Optional dataspace segment for list URLs
    pub dataspace: Option<String>,
    /// The closed set of entity types
    pub types: Vec<TypeSpec>,
    /// Save drafts automatically after edits
    pub autosave: bool,
    /// Quiet period before a debounced save or publish goes out
    pub autosave_delay_ms: u64,
    /// Static identity, for clients without a login flow
    pub user_id: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            server_url: ClientConfig::default().server_url,
            dataspace: None,
            types: Vec::new(),
            autosave: false,
            autosave_delay_ms: 1000,
            user_id: None,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("config: loaded {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.types {
            if spec.name.is_empty() {
                return Err(ConfigError::Invalid("type with empty name".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!("type {} listed twice", spec.name)));
            }
        }
        if self.autosave && self.autosave_delay_ms == 0 {
            return Err(ConfigError::Invalid("autosave needs a delay".to_string()));
        }
        Ok(())
    }

    pub fn registry(&self) -> TypeRegistry {
        TypeRegistry::new(self.types.iter().cloned())
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig { server_url: self.server_url.clone(), ..ClientConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
server_url = "https://portal.example.com"
dataspace = "good-loop"
autosave = true

[[types]]
name = "Advert"

[[types]]
name = "NGO"
endpoint = "charity"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = CoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.dataspace.as_deref(), Some("good-loop"));
        assert_eq!(config.autosave_delay_ms, 1000);
        assert_eq!(config.user_id, None);
        let registry = config.registry();
        assert_eq!(registry.check("NGO").unwrap().endpoint(), "charity");
        assert!(!registry.contains("Basket"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.server_url, "https://portal.example.com");
        assert_eq!(config.client().server_url, "https://portal.example.com");
    }

    #[test]
    fn test_rejects_duplicates_and_garbage() {
        let doubled = "[[types]]\nname = \"Advert\"\n[[types]]\nname = \"Advert\"\n";
        assert!(matches!(CoreConfig::from_toml_str(doubled), Err(ConfigError::Invalid(_))));
        assert!(matches!(CoreConfig::from_toml_str("types = 3"), Err(ConfigError::Parse(_))));
        assert!(matches!(CoreConfig::load("/nonexistent/datastore.toml"), Err(ConfigError::Io(_))));
    }
}
