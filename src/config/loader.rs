//! Configuration loading using the `config` crate.
//!
//! Sources are layered in the order they are added; environment variables
//! (`HELPDESK_SESSION__SECRET`, `HELPDESK_OIDC__CLIENT_ID`, ...) always win.

use super::AppConfig;
use crate::errors::{AuthError, Result};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::Path;

/// Layered configuration builder.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    sources: Vec<ConfigSource>,
    env_prefix: String,
}

#[derive(Debug, Clone)]
enum ConfigSource {
    File {
        path: String,
        format: FileFormat,
        required: bool,
    },
    Values(HashMap<String, config::Value>),
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            env_prefix: "HELPDESK".to_string(),
        }
    }

    /// Set the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Add a configuration file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P, required: bool) -> Self {
        let path = path.as_ref().to_string_lossy().to_string();
        let format = detect_format(&path);
        self.sources.push(ConfigSource::File {
            path,
            format,
            required,
        });
        self
    }

    /// Add direct overrides, keyed by dotted path (`session.ttl_hours`)
    pub fn add_values(mut self, values: HashMap<String, config::Value>) -> Self {
        self.sources.push(ConfigSource::Values(values));
        self
    }

    /// Build, deserialize and validate the configuration.
    pub fn load(self) -> Result<AppConfig> {
        let mut builder = Config::builder();

        for source in self.sources {
            match source {
                ConfigSource::File {
                    path,
                    format,
                    required,
                } => {
                    tracing::debug!(path = %path, required, "adding configuration file");
                    builder = builder.add_source(File::new(&path, format).required(required));
                }
                ConfigSource::Values(values) => {
                    for (key, value) in values {
                        builder = builder.set_override(&key, value).map_err(|e| {
                            AuthError::configuration(format!("Failed to set override: {e}"))
                        })?;
                    }
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to build configuration: {e}")))?
            .try_deserialize::<AppConfig>()
            .map_err(|e| AuthError::configuration(format!("Failed to deserialize configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }
}

fn detect_format(path: &str) -> FileFormat {
    match Path::new(path).extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    }
}
