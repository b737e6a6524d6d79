use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.max_workers == 0 {
        return Err(ConfigError::Validation {
            message: "max_workers must be at least 1".to_string(),
        });
    }

    if config.listener_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "listener_capacity must be at least 1".to_string(),
        });
    }

    if config.allowed_models.is_empty() {
        return Err(ConfigError::Validation {
            message: "allowed_models must not be empty".to_string(),
        });
    }

    if let Some(ext) = config
        .supported_extensions
        .iter()
        .find(|ext| !ext.starts_with('.') || ext.len() < 2)
    {
        return Err(ConfigError::Validation {
            message: format!("Extension '{}' must look like '.wav'", ext),
        });
    }

    if config.max_job_duration_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "max_job_duration_secs must be positive when set".to_string(),
        });
    }

    Ok(())
}
