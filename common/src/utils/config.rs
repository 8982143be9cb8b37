use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_upload_max_bytes")]
    pub upload_max_bytes: usize,
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,
    #[serde(default = "default_max_queued_builds")]
    pub max_queued_builds: usize,
    /// Zero disables the per-step timeout.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,
    #[serde(default)]
    pub job_retention_secs: Option<u64>,
    #[serde(default = "default_retention_sweep_interval_secs")]
    pub retention_sweep_interval_secs: u64,
    #[serde(default = "default_preserve_failed_workspaces")]
    pub preserve_failed_workspaces: bool,
    #[serde(default = "default_mobile_app_id")]
    pub mobile_app_id: String,
    #[serde(default = "default_mobile_app_name")]
    pub mobile_app_name: String,
    #[serde(default = "default_mobile_min_sdk")]
    pub mobile_min_sdk: u32,
    #[serde(default = "default_mobile_target_sdk")]
    pub mobile_target_sdk: u32,
    #[serde(default = "default_npm_command")]
    pub npm_command: String,
    #[serde(default = "default_npx_command")]
    pub npx_command: String,
    #[serde(default = "default_gradle_command")]
    pub gradle_command: String,
}

impl AppConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    pub fn job_retention(&self) -> Option<Duration> {
        self.job_retention_secs.map(Duration::from_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            upload_max_bytes: default_upload_max_bytes(),
            max_concurrent_builds: default_max_concurrent_builds(),
            max_queued_builds: default_max_queued_builds(),
            step_timeout_secs: default_step_timeout_secs(),
            max_extracted_bytes: default_max_extracted_bytes(),
            job_retention_secs: None,
            retention_sweep_interval_secs: default_retention_sweep_interval_secs(),
            preserve_failed_workspaces: default_preserve_failed_workspaces(),
            mobile_app_id: default_mobile_app_id(),
            mobile_app_name: default_mobile_app_name(),
            mobile_min_sdk: default_mobile_min_sdk(),
            mobile_target_sdk: default_mobile_target_sdk(),
            npm_command: default_npm_command(),
            npx_command: default_npx_command(),
            gradle_command: default_gradle_command(),
        }
    }
}

fn default_http_port() -> u16 {
    3001
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_upload_max_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_max_concurrent_builds() -> usize {
    2
}

fn default_max_queued_builds() -> usize {
    16
}

fn default_step_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_extracted_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_retention_sweep_interval_secs() -> u64 {
    60
}

fn default_preserve_failed_workspaces() -> bool {
    true
}

fn default_mobile_app_id() -> String {
    "com.gameconverter.app".to_string()
}

fn default_mobile_app_name() -> String {
    "AppZorb App".to_string()
}

fn default_mobile_min_sdk() -> u32 {
    21
}

fn default_mobile_target_sdk() -> u32 {
    33
}

fn default_npm_command() -> String {
    "npm".to_string()
}

fn default_npx_command() -> String {
    "npx".to_string()
}

fn default_gradle_command() -> String {
    "./gradlew".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();

        assert_eq!(config.http_port, 3001);
        assert_eq!(config.upload_max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.mobile_app_id, "com.gameconverter.app");
        assert!(config.job_retention().is_none());
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn zero_step_timeout_disables_it() {
        let config = AppConfig {
            step_timeout_secs: 0,
            ..Default::default()
        };

        assert!(config.step_timeout().is_none());
    }

    #[test]
    fn empty_sources_deserialize_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .and_then(|config| config.try_deserialize())
            .expect("defaults should deserialize");

        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.max_queued_builds, 16);
    }
}
