//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use voxbridge_core::Config;

/// Server configuration loaded from YAML with environment overrides.
///
/// The core pipeline sections (`vad`, `stt`, `recording`, `queues`, ...)
/// are flattened in, so a config file reads as one document:
///
/// ```yaml
/// bind_port: 47600
/// stt:
///   backend: streaming
///   language: fr
/// vad:
///   speech_start_rms: 10
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = auto-allocate).
    /// Override: `VOXBRIDGE_BIND_PORT`
    pub bind_port: u16,

    /// Core pipeline configuration.
    #[serde(flatten)]
    pub core: Config,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VOXBRIDGE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("VOXBRIDGE_LANGUAGE") {
            if !val.is_empty() {
                self.core.stt.language = val;
            }
        }

        if let Ok(val) = std::env::var("VOXBRIDGE_STT_API_KEY") {
            if !val.is_empty() {
                self.core.stt.api_key = Some(val);
            }
        }

        if let Ok(val) = std::env::var("VOXBRIDGE_AGENT_ENDPOINT") {
            if !val.is_empty() {
                self.core.agent_endpoint = Some(val);
            }
        }

        // Note: VOXBRIDGE_RECORDINGS_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to the core `Config` type.
    pub fn into_core_config(self) -> Config {
        Config {
            preferred_port: self.bind_port,
            ..self.core
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_to_core() {
        let config = ServerConfig::default().into_core_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.preferred_port, 0);
    }

    #[test]
    fn yaml_sections_land_in_core_config() {
        let yaml = r#"
bind_port: 48000
media_path: /provider/media
stt:
  backend: batch
  language: en
vad:
  speech_start_rms: 42
"#;
        let parsed: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        let core = parsed.into_core_config();
        assert_eq!(core.preferred_port, 48000);
        assert_eq!(core.media_path, "/provider/media");
        assert_eq!(core.stt.language, "en");
        assert_eq!(core.vad.speech_start_rms, 42);
    }
}
