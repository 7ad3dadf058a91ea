//! # Tapwire Configuration
//!
//! Layered configuration for the capture engine: compiled defaults, then YAML
//! files, then `TAPWIRE_*` environment variables. Every load is validated and
//! a configuration that fails validation never reaches the engine.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod assembly;
mod capture;
mod engine;
mod error;
mod filter;
mod telemetry;
mod validation;

pub use assembly::{AssemblyConfig, OptionCheck};
pub use capture::CaptureConfig;
pub use engine::EngineConfig;
pub use error::ConfigError;
pub use filter::FilterConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/tapwire.yaml";
const ENV_PREFIX: &str = "TAPWIRE_";

#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct TapwireConfig {
    /// Packet source parameters.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Which flows are parsed and which are reported as outbound links.
    #[validate(nested)]
    #[serde(default)]
    pub filter: FilterConfig,

    /// TCP reassembly policy.
    #[validate(nested)]
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// HTTP parsing and entry post-processing.
    #[validate(nested)]
    #[serde(default)]
    pub engine: EngineConfig,

    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl TapwireConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/tapwire.yaml`, if present
    /// 3. `config/<TAPWIRE_ENV>.yaml`, if present (`production` by default)
    /// 4. `TAPWIRE_*` environment variables, sections split on `__`
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(TapwireConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("TAPWIRE_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific file, still honouring the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(TapwireConfig::default()))
            .merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tapwire_core::{CaptureDirection, CaptureMode};

    fn to_figment(e: ConfigError) -> figment::Error {
        figment::Error::from(e.to_string())
    }

    #[test]
    fn full_config_validation() {
        let config = TapwireConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn yaml_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/tapwire.yaml",
                r#"
filter:
  mode: host
  direction: any
  authorities: ["10.0.0.9:80"]
engine:
  max_message_bytes: 1MiB
  mask_patterns: ['password=\w+']
"#,
            )?;
            jail.set_env("TAPWIRE_CAPTURE__INTERFACE", "eth1");

            let config = TapwireConfig::load().map_err(to_figment)?;
            assert_eq!(config.filter.mode, CaptureMode::Host);
            assert_eq!(config.filter.direction, CaptureDirection::Any);
            assert_eq!(config.engine.max_message_bytes, 1024 * 1024);
            assert_eq!(config.capture.interface, "eth1");
            assert!(config.assembly.allow_missing_init);
            Ok(())
        });
    }

    #[test]
    fn environment_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/tapwire.yaml", "assembly:\n  idle_timeout_secs: 30\n")?;
            jail.create_file("config/staging.yaml", "assembly:\n  idle_timeout_secs: 5\n")?;
            jail.set_env("TAPWIRE_ENV", "staging");

            let config = TapwireConfig::load().map_err(to_figment)?;
            assert_eq!(config.assembly.idle_timeout_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_fatal() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.yaml", "filter:\n  authorities: [\"not-an-ip\"]\n")?;
            match TapwireConfig::load_from_path("bad.yaml") {
                Err(ConfigError::Validation(errors)) => {
                    let message = ConfigError::Validation(errors).to_string();
                    assert!(message.contains("filter.authorities"), "{message}");
                }
                other => panic!("expected validation error, got {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            TapwireConfig::load_from_path("/nonexistent/tapwire.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
