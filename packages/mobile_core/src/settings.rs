use serde::{Deserialize, de::DeserializeOwned};

use crate::log_redirect::DEFAULT_LOG_FILTER;

pub const SETTINGS_PATH_ENV: &str = "FRPC_MOBILE_SETTINGS";
pub const CLIENT_BIN_ENV: &str = "FRPC_MOBILE_CLIENT_BIN";
pub const LOG_FILTER_ENV: &str = "FRPC_MOBILE_LOG";

/// Host side settings for the embedded service. These never touch the
/// client's own config file, which is passed through untouched.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShimSettings {
    #[serde(default = "default_client_binary")]
    pub client_binary: String,
    #[serde(default)]
    pub client_args: Vec<String>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_capture_stdio")]
    pub capture_stdio: bool,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for ShimSettings {
    fn default() -> Self {
        ShimSettings {
            client_binary: default_client_binary(),
            client_args: Vec::new(),
            log_filter: default_log_filter(),
            capture_stdio: default_capture_stdio(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

fn default_client_binary() -> String {
    "frpc".to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_capture_stdio() -> bool {
    true
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl ShimSettings {
    pub fn load(path: &str) -> Result<Self, LoadSettingsError> {
        filetype_load(path)
    }

    /// Settings file named by `FRPC_MOBILE_SETTINGS`, then single value
    /// overrides from the environment. A file that fails to load is returned
    /// alongside the defaults so the caller can log it once logging is up.
    pub fn from_env() -> (Self, Option<LoadSettingsError>) {
        let (mut settings, error) = match std::env::var(SETTINGS_PATH_ENV) {
            Ok(path) => match Self::load(&path) {
                Ok(settings) => (settings, None),
                Err(error) => (Self::default(), Some(error)),
            },
            Err(_) => (Self::default(), None),
        };

        settings.apply_overrides(|name| std::env::var(name).ok());
        (settings, error)
    }

    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(binary) = var(CLIENT_BIN_ENV).filter(|v| !v.is_empty()) {
            self.client_binary = binary;
        }

        if let Some(filter) = var(LOG_FILTER_ENV).filter(|v| !v.is_empty()) {
            self.log_filter = filter;
        }
    }
}

fn filetype_load<T: DeserializeOwned>(path: &str) -> Result<T, LoadSettingsError> {
    let data = std::fs::read_to_string(path).map_err(LoadSettingsError::IoError)?;

    if path.ends_with(".toml") {
        return toml::from_str(&data).map_err(|error| LoadSettingsError::ParseError(error.to_string()));
    }

    if path.ends_with(".json") {
        return serde_json::from_str(&data).map_err(|error| LoadSettingsError::ParseError(error.to_string()));
    }

    Err(LoadSettingsError::UnknownFiletype(path.to_string()))
}

#[derive(Debug)]
pub enum LoadSettingsError {
    IoError(std::io::Error),
    ParseError(String),
    UnknownFiletype(String),
}

impl std::fmt::Display for LoadSettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSettingsError::IoError(e) => write!(f, "IO error: {}", e),
            LoadSettingsError::ParseError(e) => write!(f, "Parse error: {}", e),
            LoadSettingsError::UnknownFiletype(path) => write!(f, "Unknown settings file type: {}", path),
        }
    }
}

impl std::error::Error for LoadSettingsError {}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::{CLIENT_BIN_ENV, LOG_FILTER_ENV, LoadSettingsError, ShimSettings};

    fn write_temp(name: &str, contents: &str) -> String {
        let dir = std::env::temp_dir().join(format!("frpc-mobile-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn defaults_capture_everything() {
        let settings = ShimSettings::default();
        assert_eq!(settings.client_binary, "frpc");
        assert!(settings.client_args.is_empty());
        assert_eq!(settings.log_filter, "trace");
        assert!(settings.capture_stdio);
        assert_eq!(settings.stop_grace_secs, 5);
    }

    #[test]
    fn load_toml_with_missing_fields() {
        let path = write_temp(
            "partial.toml",
            r#"
            client_binary = "/data/app/lib/arm64/libfrpc.so"
            capture_stdio = false
            "#,
        );

        let settings = ShimSettings::load(&path).unwrap();
        assert_eq!(settings.client_binary, "/data/app/lib/arm64/libfrpc.so");
        assert!(!settings.capture_stdio);
        assert_eq!(settings.log_filter, "trace");
        assert_eq!(settings.stop_grace_secs, 5);
    }

    #[test]
    fn load_json() {
        let path = write_temp(
            "full.json",
            r#"{"client_binary": "frpc", "client_args": ["--strict_config"], "log_filter": "info", "stop_grace_secs": 2}"#,
        );

        let settings = ShimSettings::load(&path).unwrap();
        assert_eq!(settings.client_args, vec!["--strict_config".to_string()]);
        assert_eq!(settings.log_filter, "info");
        assert_eq!(settings.stop_grace_secs, 2);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let path = write_temp("settings.ini", "client_binary=frpc");
        assert!(matches!(ShimSettings::load(&path), Err(LoadSettingsError::UnknownFiletype(_))));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let path = write_temp("broken.toml", "client_binary = [");
        assert!(matches!(ShimSettings::load(&path), Err(LoadSettingsError::ParseError(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            ShimSettings::load("/nonexistent/frpc-mobile.toml"),
            Err(LoadSettingsError::IoError(_))
        ));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars = HashMap::from([
            (CLIENT_BIN_ENV, "/opt/frpc".to_string()),
            (LOG_FILTER_ENV, String::new()),
        ]);

        let mut settings = ShimSettings::default();
        settings.apply_overrides(|name| vars.get(name).cloned());

        assert_eq!(settings.client_binary, "/opt/frpc");
        assert_eq!(settings.log_filter, "trace");
    }
}
