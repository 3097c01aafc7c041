use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::hosts::{
    CheveretoV3Backend, CheveretoV4Backend, ImgBbBackend, PtpImgBackend,
};
use crate::uploader::{ClientSettings, ImageHost, RetryConfig, UploadOptions};

const APP_DIR_NAME: &str = "Image Host Uploader";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheveretoV3Config {
    pub base_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub persist_session: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImgBbConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheveretoV4Config {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PtpImgConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_unit_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub delete_job_as_completed: bool,
    pub download_concurrency: usize,
    pub log_level: String,
    pub chevereto_v3: Option<CheveretoV3Config>,
    pub imgbb: Option<ImgBbConfig>,
    pub chevereto_v4: Option<CheveretoV4Config>,
    pub ptpimg: Option<PtpImgConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 4,
            max_attempts: 3,
            backoff_unit_ms: 1000,
            max_backoff_ms: 120_000,
            request_timeout_secs: 60,
            delete_job_as_completed: false,
            download_concurrency: 4,
            log_level: "info".to_string(),
            chevereto_v3: None,
            imgbb: None,
            chevereto_v4: None,
            ptpimg: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: self.retry_config(),
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            batch_size: self.batch_size,
            ..Default::default()
        }
    }

    /// Host names that have a configuration section.
    pub fn configured_hosts(&self) -> Vec<&'static str> {
        let mut hosts = Vec::new();
        if self.chevereto_v3.is_some() {
            hosts.push("chevereto_v3");
        }
        if self.imgbb.is_some() {
            hosts.push("imgbb");
        }
        if self.chevereto_v4.is_some() {
            hosts.push("chevereto_v4");
        }
        if self.ptpimg.is_some() {
            hosts.push("ptpimg");
        }
        hosts
    }

    /// Build the backend for `host_name` from its configuration section.
    ///
    /// Gallery hosts need an external client and cannot be built from config.
    pub fn build_backend(&self, host_name: &str) -> AppResult<ImageHost> {
        let settings = self.client_settings();
        let missing =
            || AppError::configuration(format!("No configuration for host '{}'", host_name));

        match host_name {
            "chevereto_v3" => {
                let section = self.chevereto_v3.as_ref().ok_or_else(missing)?;
                let mut backend = CheveretoV3Backend::new(
                    &section.base_url,
                    section.user.as_deref().unwrap_or_default(),
                    section.password.as_deref().unwrap_or_default(),
                    &settings,
                )?;
                if section.persist_session {
                    backend = backend.with_session_file(session_file_for(&section.base_url)?);
                }
                Ok(backend.into())
            }
            "imgbb" => {
                let section = self.imgbb.as_ref().ok_or_else(missing)?;
                let backend = match section.base_url.as_deref() {
                    Some(base_url) => {
                        ImgBbBackend::with_base_url(section.api_key.as_deref(), base_url, &settings)?
                    }
                    None => ImgBbBackend::new(section.api_key.as_deref(), &settings)?,
                };
                Ok(backend.into())
            }
            "chevereto_v4" => {
                let section = self.chevereto_v4.as_ref().ok_or_else(missing)?;
                let backend =
                    CheveretoV4Backend::new(&section.base_url, section.api_key.as_deref(), &settings)?;
                Ok(backend.into())
            }
            "ptpimg" => {
                let section = self.ptpimg.as_ref().ok_or_else(missing)?;
                let backend = match section.base_url.as_deref() {
                    Some(base_url) => {
                        PtpImgBackend::with_base_url(section.api_key.as_deref(), base_url, &settings)?
                    }
                    None => PtpImgBackend::new(section.api_key.as_deref(), &settings)?,
                };
                Ok(backend.into())
            }
            other => Err(AppError::UnknownHost {
                host: other.to_string(),
            }),
        }
    }
}

fn app_directory(base: Option<PathBuf>, kind: &str) -> AppResult<PathBuf> {
    let dir = base
        .ok_or_else(|| AppError::configuration(format!("Could not find {} directory", kind)))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn get_config_path() -> AppResult<PathBuf> {
    Ok(app_directory(dirs::config_dir(), "config")?.join("config.json"))
}

pub fn get_data_directory() -> AppResult<PathBuf> {
    app_directory(dirs::data_dir(), "data")
}

pub fn get_sessions_directory() -> AppResult<PathBuf> {
    let sessions_dir = get_data_directory()?.join("sessions");
    fs::create_dir_all(&sessions_dir)?;
    Ok(sessions_dir)
}

/// Session blob location for a host, derived from its base URL.
fn session_file_for(base_url: &str) -> AppResult<PathBuf> {
    let slug: String = base_url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    Ok(get_sessions_directory()?.join(format!("{}.json", slug)))
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

/// Load from `path`, writing defaults when absent and falling back to them
/// when the file cannot be parsed.
pub fn load_config_from(path: &Path) -> AppResult<Config> {
    if !path.exists() {
        let default_config = Config::default();
        write_config(path, &default_config)?;
        return Ok(default_config);
    }

    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!("Failed to parse config file: {}. Using defaults.", e);
        Config::default()
    });

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config) -> AppResult<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;
    write_config(path, config)
}

fn write_config(path: &Path, config: &Config) -> AppResult<()> {
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if config.batch_size == 0 {
        return Err(AppError::validation("batch_size", "Must be greater than 0"));
    }

    if config.max_attempts == 0 || config.max_attempts > 10 {
        return Err(AppError::validation("max_attempts", "Must be between 1 and 10"));
    }

    if config.download_concurrency == 0 {
        return Err(AppError::validation("download_concurrency", "Must be greater than 0"));
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    if let Some(section) = &config.chevereto_v3 {
        InputValidator::validate_host_url("chevereto_v3.base_url", &section.base_url)?;
    }
    if let Some(base_url) = config.imgbb.as_ref().and_then(|s| s.base_url.as_deref()) {
        InputValidator::validate_host_url("imgbb.base_url", base_url)?;
    }
    if let Some(section) = &config.chevereto_v4 {
        InputValidator::validate_host_url("chevereto_v4.base_url", &section.base_url)?;
    }
    if let Some(base_url) = config.ptpimg.as_ref().and_then(|s| s.base_url.as_deref()) {
        InputValidator::validate_host_url("ptpimg.base_url", base_url)?;
    }

    Ok(())
}

pub fn reset_config() -> AppResult<Config> {
    reset_config_at(&get_config_path()?)
}

pub fn reset_config_at(path: &Path) -> AppResult<Config> {
    if path.exists() {
        let backup_path = path.with_extension("json.reset_backup");
        fs::copy(path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    let default_config = Config::default();
    write_config(path, &default_config)?;

    log::info!("Configuration reset to defaults");
    Ok(default_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.retry_config().max_attempts, 3);
        assert_eq!(config.client_settings().request_timeout, Duration::from_secs(60));
        assert_eq!(config.upload_options().batch_size, 4);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::default();
        config.batch_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.max_attempts = 11;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.chevereto_v4 = Some(CheveretoV4Config {
            base_url: "ftp://img.example".to_string(),
            api_key: None,
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"batch_size": 8, "imgbb": {"api_key": "k", "base_url": null}}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.configured_hosts(), vec!["imgbb"]);
    }

    #[test]
    fn save_keeps_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        save_config_to(&path, &Config::default()).unwrap();

        let mut changed = Config::default();
        changed.batch_size = 2;
        save_config_to(&path, &changed).unwrap();

        let backup: Config =
            serde_json::from_str(&fs::read_to_string(path.with_extension("json.bak")).unwrap())
                .unwrap();
        assert_eq!(backup.batch_size, 4);
        assert_eq!(load_config_from(&path).unwrap().batch_size, 2);
    }

    #[test]
    fn unknown_or_unconfigured_hosts_cannot_be_built() {
        let config = Config::default();
        assert!(matches!(
            config.build_backend("imgbb"),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            config.build_backend("nope"),
            Err(AppError::UnknownHost { .. })
        ));
    }

    #[test]
    fn configured_host_is_built() {
        let mut config = Config::default();
        config.ptpimg = Some(PtpImgConfig {
            api_key: Some("key".to_string()),
            base_url: None,
        });
        let backend = config.build_backend("ptpimg").unwrap();
        assert_eq!(backend.name(), "PTPIMG");
    }
}
