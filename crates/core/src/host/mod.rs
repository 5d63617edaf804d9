//! The seam between the suspension core and a concrete browser.

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::Result;
use crate::script::PageScript;
use crate::tab::{RawCookie, TabId, TabSnapshot};

#[async_trait]
pub trait TabHost: Send + Sync {
    /// All tabs in normal browser windows.
    async fn list_tabs(&self) -> Result<Vec<TabSnapshot>>;

    /// Tabs that are currently the selected tab of their window. Queried
    /// separately from `list_tabs` because a tab can be active in one window
    /// while the snapshot list came from a different moment.
    async fn active_tab_ids(&self) -> Result<HashSet<TabId>>;

    /// Evaluate a script in the tab's page. Rejections from the browser
    /// (restricted pages, missing permission) surface as `Error::Script`.
    async fn run_script(&self, tab: &TabId, script: &PageScript) -> Result<Value>;

    async fn all_cookies(&self) -> Result<Vec<RawCookie>>;

    /// Delete cookies set for `domain` or its subdomains, optionally only
    /// those called `name`. Returns how many were removed.
    async fn delete_cookies(&self, domain: &str, name: Option<&str>) -> Result<usize>;
}
