use serde::{Deserialize, Serialize};
use std::fmt;

/// Idle time assumed for a tab whose last access is unknown.
pub const UNKNOWN_IDLE_FALLBACK_MS: i64 = 10 * 60_000;

/// Opaque browser handle for a tab. For CDP hosts this is the target id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TabId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Point-in-time view of an open tab. Read fresh on every sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: TabId,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub is_active: bool,
    /// Epoch milliseconds; `None` when the host has never seen the tab in use.
    #[serde(default)]
    pub last_accessed: Option<i64>,
}

impl TabSnapshot {
    pub fn new(id: impl Into<TabId>, url: &str, title: &str) -> Self {
        Self {
            id: id.into(),
            url: url.to_string(),
            title: title.to_string(),
            is_active: false,
            last_accessed: None,
        }
    }

    pub fn active(mut self) -> Self {
        self.is_active = true;
        self
    }

    pub fn last_accessed(mut self, at_ms: i64) -> Self {
        self.last_accessed = Some(at_ms);
        self
    }
}

/// A cookie as reported by the browser, before grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCookie {
    pub name: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl RawCookie {
    pub fn new(name: &str, domain: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            secure: false,
            http_only: false,
        }
    }

    /// True if the cookie was set for `domain` or one of its subdomains.
    /// A leading dot on either side is ignored.
    pub fn is_for_domain(&self, domain: &str) -> bool {
        let own = self.domain.trim_start_matches('.').to_lowercase();
        let wanted = domain.trim().trim_start_matches('.').to_lowercase();
        !wanted.is_empty() && (own == wanted || own.ends_with(&format!(".{}", wanted)))
    }
}
