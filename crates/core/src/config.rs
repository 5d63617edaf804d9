use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// How the daemon reaches the browser it manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_browser_host")]
    pub host: String,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    /// Launch a browser instead of attaching to one that is already running
    /// with `--remote-debugging-port`.
    #[serde(default)]
    pub launch: bool,
    #[serde(default = "default_headed")]
    pub headed: bool,
    /// chrome | edge
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Profile directory used when launching. Defaults to ~/.tabsentinel/profiles/<engine>.
    #[serde(default)]
    pub user_data_dir: Option<String>,
}

fn default_browser_host() -> String {
    "127.0.0.1".to_string()
}

fn default_debug_port() -> u16 {
    9222
}

fn default_headed() -> bool {
    true
}

fn default_engine() -> String {
    "chrome".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: default_browser_host(),
            debug_port: default_debug_port(),
            launch: false,
            headed: default_headed(),
            engine: default_engine(),
            user_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspenderConfig {
    /// Seconds between sweeps. Not part of the user policy.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Image shown on the placeholder. Falls back to the built-in logo.
    #[serde(default)]
    pub icon_url: Option<String>,
    /// Seconds between popup scrubs of every open tab while the blocker is on.
    #[serde(default = "default_popup_scrub_interval")]
    pub popup_scrub_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_popup_scrub_interval() -> u64 {
    5
}

impl Default for SuspenderConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            icon_url: None,
            popup_scrub_interval_secs: default_popup_scrub_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    18795
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            api_token: None,
        }
    }
}

impl GatewayConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Emit one info line per suspended tab. Off by default; the lines still go to debug.
    #[serde(default)]
    pub sleep_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub suspender: SuspenderConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.suspender.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "suspender.sweepIntervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.suspender.popup_scrub_interval_secs == 0 {
            return Err(Error::Config(
                "suspender.popupScrubIntervalSecs must be greater than zero".to_string(),
            ));
        }
        match self.browser.engine.to_lowercase().as_str() {
            "chrome" | "chromium" | "edge" | "msedge" => Ok(()),
            other => Err(Error::Config(format!(
                "unsupported browser engine '{}': expected chrome or edge",
                other
            ))),
        }
    }

    pub fn browser_ws_discovery_url(&self) -> String {
        format!(
            "http://{}:{}/json/version",
            self.browser.host, self.browser.debug_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "browser": { "debugPort": 9333 }, "gateway": { "apiToken": "  " } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.browser.debug_port, 9333);
        assert_eq!(cfg.browser.host, "127.0.0.1");
        assert_eq!(cfg.suspender.sweep_interval_secs, 30);
        assert_eq!(cfg.suspender.popup_scrub_interval_secs, 5);
        assert_eq!(cfg.gateway.api_token(), None);
        assert!(!cfg.logging.sleep_logs);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.suspender.sweep_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_firefox_rejected() {
        let mut cfg = Config::default();
        cfg.browser.engine = "firefox".to_string();
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("tabsentinel-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let mut cfg = Config::default();
        cfg.gateway.port = 20000;
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.gateway.port, 20000);
        let _ = std::fs::remove_dir_all(dir);
    }
}
