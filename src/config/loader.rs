//! Configuration loader: YAML files with environment variable expansion, or
//! the bare process environment

use super::{
    default_port, default_service_id, default_timeout_secs, expand_env_vars, BackendKind, Config,
    ConfigError, LoggingConfig, ServerConfig, StorageConfig, UploadConfig, DEFAULT_CONTAINER,
};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables
    pub fn from_env() -> Result<Config, ConfigError> {
        let account = required("AZURE_STORAGE_ACCOUNT")?;
        let access_key = required("AZURE_STORAGE_ACCESS_KEY")?;
        let port: u16 = parsed("PORT")?.unwrap_or_else(default_port);
        let timeout_secs: u64 = parsed("REQUEST_TIMEOUT_SECS")?.unwrap_or_else(default_timeout_secs);
        let hostname = optional("HOSTNAME").unwrap_or_else(|| "localhost".to_string());

        let config = Config {
            server: ServerConfig {
                address: format!("0.0.0.0:{}", port),
                public_name: optional("PUBLICNAME").unwrap_or_else(|| "localhost".to_string()),
                service_id: optional("SERVICE_ID").unwrap_or_else(default_service_id),
                hostname,
                timeout_secs,
            },
            storage: StorageConfig {
                backend: BackendKind::Azure,
                account,
                access_key,
                container: optional("AZURE_STORAGE_CONTAINER")
                    .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
                endpoint: optional("AZURE_STORAGE_ENDPOINT"),
                ..Default::default()
            },
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "AZURE_STORAGE_ACCOUNT",
        "AZURE_STORAGE_ACCESS_KEY",
        "AZURE_STORAGE_CONTAINER",
        "AZURE_STORAGE_ENDPOINT",
        "PORT",
        "HOSTNAME",
        "PUBLICNAME",
        "SERVICE_ID",
        "REQUEST_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        std::env::set_var("AZURE_STORAGE_ACCOUNT", "devaccount");
        std::env::set_var("AZURE_STORAGE_ACCESS_KEY", "c2VjcmV0");

        let config = ConfigLoader::from_env().unwrap();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert_eq!(config.server.service_id, "maana-service");
        assert_eq!(config.server.timeout_secs, 600);
        assert_eq!(config.storage.account, "devaccount");
        assert_eq!(config.storage.container, DEFAULT_CONTAINER);
        assert!(config.storage.endpoint.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("AZURE_STORAGE_ACCOUNT", "devaccount");
        std::env::set_var("AZURE_STORAGE_ACCESS_KEY", "c2VjcmV0");
        std::env::set_var("PORT", "9000");
        std::env::set_var("SERVICE_ID", "io.maana.azure-storage");
        std::env::set_var("REQUEST_TIMEOUT_SECS", "30");
        std::env::set_var("AZURE_STORAGE_CONTAINER", "uploads");

        let config = ConfigLoader::from_env().unwrap();
        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.server.service_id, "io.maana.azure-storage");
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.storage.container, "uploads");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_account() {
        clear_env();
        std::env::set_var("AZURE_STORAGE_ACCESS_KEY", "c2VjcmV0");

        let err = ConfigLoader::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ref name) if name == "AZURE_STORAGE_ACCOUNT"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_bad_port() {
        clear_env();
        std::env::set_var("AZURE_STORAGE_ACCOUNT", "devaccount");
        std::env::set_var("AZURE_STORAGE_ACCESS_KEY", "c2VjcmV0");
        std::env::set_var("PORT", "eighty");

        let err = ConfigLoader::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "PORT"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_expansion() {
        std::env::set_var("RELAY_TEST_ACCOUNT", "yamlaccount");
        let yaml = r#"
server:
  address: "127.0.0.1:0"
storage:
  account: "${RELAY_TEST_ACCOUNT}"
  access_key: "${RELAY_TEST_KEY:-c2VjcmV0}"
"#;
        let config = ConfigLoader::from_yaml_str(yaml).unwrap();
        assert_eq!(config.storage.account, "yamlaccount");
        assert_eq!(config.storage.access_key, "c2VjcmV0");
        assert_eq!(config.storage.backend, BackendKind::Azure);
        std::env::remove_var("RELAY_TEST_ACCOUNT");
    }
}
