use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::settings::{keys, SettingsStore};

pub const DEFAULT_SUSPEND_TIME_MS: u64 = 60 * 60_000;
pub const MIN_SUSPEND_TIME_MINUTES: u64 = 1;
pub const MAX_SUSPEND_TIME_MINUTES: u64 = 1440;

/// Suggested exclusions offered to the user. Never applied implicitly.
pub const DEFAULT_EXCLUDED_SITES: &[&str] = &[
    "mail.google.com",
    "calendar.google.com",
    "google.com",
    "www.youtube.com",
    "spotify.com",
    "netflix.com",
    "zoom.us",
    "chatgpt.com",
];

/// Internal browser pages, extension pages and local files.
pub const DISALLOWED_SCHEMES: &[&str] = &["chrome", "chrome-extension", "edge", "about", "file"];

pub const DEFAULT_ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Suspension policy as read from the settings store at the start of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub enabled: bool,
    pub suspend_after_ms: u64,
    /// Normalized with [`normalize_host`].
    pub excluded_hosts: BTreeSet<String>,
    pub allowed_schemes: BTreeSet<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            suspend_after_ms: DEFAULT_SUSPEND_TIME_MS,
            excluded_hosts: BTreeSet::new(),
            allowed_schemes: DEFAULT_ALLOWED_SCHEMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Policy {
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let settings = store.all().await?;
        Ok(Self::from_settings(&settings))
    }

    /// Missing or malformed keys fall back to defaults. Only an explicit
    /// `false` disables suspension, and a zero delay means "use the default".
    pub fn from_settings(settings: &Map<String, Value>) -> Self {
        let enabled = !matches!(settings.get(keys::EXTENSION_ENABLED), Some(Value::Bool(false)));

        let suspend_after_ms = settings
            .get(keys::SUSPEND_TIME)
            .and_then(positive_millis)
            .unwrap_or(DEFAULT_SUSPEND_TIME_MS);

        let excluded_hosts = match settings.get(keys::EXCLUDED_SITES) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(normalize_host)
                .collect(),
            _ => BTreeSet::new(),
        };

        Self {
            enabled,
            suspend_after_ms,
            excluded_hosts,
            ..Self::default()
        }
    }

    pub fn with_suspend_after_ms(mut self, ms: u64) -> Self {
        self.suspend_after_ms = ms;
        self
    }

    pub fn with_excluded_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_hosts = hosts
            .into_iter()
            .filter_map(|h| normalize_host(h.as_ref()))
            .collect();
        self
    }

    pub fn is_host_excluded(&self, host: &str) -> bool {
        normalize_host(host)
            .map(|h| self.excluded_hosts.contains(&h))
            .unwrap_or(false)
    }

    pub fn is_scheme_allowed(&self, scheme: &str) -> bool {
        let scheme = scheme.trim_end_matches(':').to_ascii_lowercase();
        self.allowed_schemes.contains(&scheme) && !DISALLOWED_SCHEMES.contains(&scheme.as_str())
    }
}

fn positive_millis(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return (ms > 0).then_some(ms);
    }
    value
        .as_f64()
        .filter(|ms| ms.is_finite() && *ms >= 1.0)
        .map(|ms| ms.round() as u64)
}

/// Cookie-style host normalization: lowercase, no scheme, no path or port,
/// no leading or trailing dots. Returns `None` for blank input.
pub fn normalize_host(raw: &str) -> Option<String> {
    let mut host = raw.trim();
    if let Some(idx) = host.find("://") {
        host = &host[idx + 3..];
    }
    if let Some(idx) = host.find(['/', '?', '#']) {
        host = &host[..idx];
    }
    if let Some(idx) = host.rfind('@') {
        host = &host[idx + 1..];
    }
    // Strip a port, but leave bracketed IPv6 literals alone.
    if !host.starts_with('[') {
        if let Some(idx) = host.rfind(':') {
            host = &host[..idx];
        }
    }
    let host = host.trim_start_matches('.').trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Validate a delay typed by the user, in minutes, and convert it to milliseconds.
pub fn suspend_minutes_to_ms(minutes: u64) -> std::result::Result<u64, String> {
    if !(MIN_SUSPEND_TIME_MINUTES..=MAX_SUSPEND_TIME_MINUTES).contains(&minutes) {
        return Err(format!(
            "suspend delay must be between {} and {} minutes, got {}",
            MIN_SUSPEND_TIME_MINUTES, MAX_SUSPEND_TIME_MINUTES, minutes
        ));
    }
    Ok(minutes * 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use serde_json::json;

    fn settings(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let policy = Policy::from_settings(&Map::new());
        assert!(policy.enabled);
        assert_eq!(policy.suspend_after_ms, DEFAULT_SUSPEND_TIME_MS);
        assert!(policy.excluded_hosts.is_empty());
        assert!(policy.allowed_schemes.contains("https"));
    }

    #[test]
    fn test_only_explicit_false_disables() {
        assert!(!Policy::from_settings(&settings(json!({"extensionEnabled": false}))).enabled);
        assert!(Policy::from_settings(&settings(json!({"extensionEnabled": null}))).enabled);
        assert!(Policy::from_settings(&settings(json!({"extensionEnabled": "false"}))).enabled);
    }

    #[test]
    fn test_zero_or_bad_suspend_time_falls_back() {
        for raw in [json!(0), json!(-5), json!("300000"), json!(0.2)] {
            let policy = Policy::from_settings(&settings(json!({ "suspendTime": raw })));
            assert_eq!(policy.suspend_after_ms, DEFAULT_SUSPEND_TIME_MS);
        }
        let policy = Policy::from_settings(&settings(json!({"suspendTime": 300000})));
        assert_eq!(policy.suspend_after_ms, 300_000);
        let policy = Policy::from_settings(&settings(json!({"suspendTime": 120000.0})));
        assert_eq!(policy.suspend_after_ms, 120_000);
    }

    #[test]
    fn test_excluded_sites_are_normalized() {
        let policy = Policy::from_settings(&settings(json!({
            "excludedSites": [".Example.COM", "https://news.site.org/path", "", 42]
        })));
        assert!(policy.excluded_hosts.contains("example.com"));
        assert!(policy.excluded_hosts.contains("news.site.org"));
        assert_eq!(policy.excluded_hosts.len(), 2);
        assert!(policy.is_host_excluded("EXAMPLE.com"));
        assert!(!policy.is_host_excluded("sub.example.com"));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host(" .Mail.Google.com "), Some("mail.google.com".to_string()));
        assert_eq!(normalize_host("http://localhost:8080/x"), Some("localhost".to_string()));
        assert_eq!(normalize_host("example.com."), Some("example.com".to_string()));
        assert_eq!(normalize_host("[::1]"), Some("[::1]".to_string()));
        assert_eq!(normalize_host("..."), None);
        assert_eq!(normalize_host(""), None);
    }

    #[test]
    fn test_scheme_checks() {
        let policy = Policy::default();
        assert!(policy.is_scheme_allowed("https"));
        assert!(policy.is_scheme_allowed("HTTP:"));
        assert!(!policy.is_scheme_allowed("chrome"));
        assert!(!policy.is_scheme_allowed("ftp"));
    }

    #[test]
    fn test_suspend_minutes_bounds() {
        assert_eq!(suspend_minutes_to_ms(5), Ok(300_000));
        assert!(suspend_minutes_to_ms(0).is_err());
        assert!(suspend_minutes_to_ms(1441).is_err());
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemorySettings::from_value(json!({
            "extensionEnabled": true,
            "suspendTime": 300000,
            "excludedSites": ["example.com"]
        }));
        let policy = Policy::load(&store).await.unwrap();
        assert_eq!(policy.suspend_after_ms, 300_000);
        assert!(policy.is_host_excluded("example.com"));
    }
}
