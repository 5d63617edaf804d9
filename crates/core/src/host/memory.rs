//! In-memory browser used by tests across the workspace.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::TabHost;
use crate::error::{Error, Result};
use crate::script::{sleep_title, PageScript};
use crate::tab::{RawCookie, TabId, TabSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPage {
    pub url: String,
    pub title: String,
    /// Title as loaded from the network; restored on reload.
    pub loaded_title: String,
    pub active: bool,
    pub last_accessed: Option<i64>,
    /// Every script is rejected, like a browser-internal page.
    pub restricted: bool,
    /// Only the freeze script is rejected.
    pub reject_freeze: bool,
    pub overlays: usize,
    pub reloads: usize,
    pub popups: usize,
    /// Third-party hosts the page references.
    pub embedded: Vec<String>,
}

impl MemoryPage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            loaded_title: title.to_string(),
            active: false,
            last_accessed: None,
            restricted: false,
            reject_freeze: false,
            overlays: 0,
            reloads: 0,
            popups: 0,
            embedded: Vec::new(),
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn last_accessed(mut self, at_ms: i64) -> Self {
        self.last_accessed = Some(at_ms);
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn reject_freeze(mut self) -> Self {
        self.reject_freeze = true;
        self
    }

    pub fn popups(mut self, count: usize) -> Self {
        self.popups = count;
        self
    }

    pub fn embeds(mut self, hosts: &[&str]) -> Self {
        self.embedded = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    fn reload(&mut self) {
        self.overlays = 0;
        self.title = self.loaded_title.clone();
        self.reloads += 1;
    }
}

#[derive(Default)]
pub struct MemoryTabHost {
    pages: Mutex<BTreeMap<TabId, MemoryPage>>,
    cookies: Mutex<Vec<RawCookie>>,
    script_log: Mutex<Vec<(TabId, &'static str)>>,
}

impl MemoryTabHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<TabId>, page: MemoryPage) {
        lock(&self.pages).insert(id.into(), page);
    }

    pub fn page(&self, id: &str) -> Option<MemoryPage> {
        lock(&self.pages).get(&TabId::from(id)).cloned()
    }

    /// User-initiated reload (F5 or clicking the overlay).
    pub fn reload(&self, id: &str) {
        if let Some(page) = lock(&self.pages).get_mut(&TabId::from(id)) {
            page.reload();
        }
    }

    pub fn close(&self, id: &str) {
        lock(&self.pages).remove(&TabId::from(id));
    }

    pub fn set_active(&self, id: &str, active: bool) {
        if let Some(page) = lock(&self.pages).get_mut(&TabId::from(id)) {
            page.active = active;
        }
    }

    /// The page's own script rewrites `document.title`; no reload happens.
    pub fn set_title(&self, id: &str, title: &str) {
        if let Some(page) = lock(&self.pages).get_mut(&TabId::from(id)) {
            page.title = title.to_string();
        }
    }

    /// Popups appearing after the page loaded.
    pub fn add_popups(&self, id: &str, count: usize) {
        if let Some(page) = lock(&self.pages).get_mut(&TabId::from(id)) {
            page.popups += count;
        }
    }

    pub fn cookies(&self) -> Vec<RawCookie> {
        lock(&self.cookies).clone()
    }

    pub fn set_cookies(&self, cookies: Vec<RawCookie>) {
        *lock(&self.cookies) = cookies;
    }

    /// Names of scripts run against `id`, in order.
    pub fn scripts_run(&self, id: &str) -> Vec<&'static str> {
        let id = TabId::from(id);
        lock(&self.script_log)
            .iter()
            .filter(|(tab, _)| *tab == id)
            .map(|(_, name)| *name)
            .collect()
    }
}

#[async_trait]
impl TabHost for MemoryTabHost {
    async fn list_tabs(&self) -> Result<Vec<TabSnapshot>> {
        Ok(lock(&self.pages)
            .iter()
            .map(|(id, page)| TabSnapshot {
                id: id.clone(),
                url: page.url.clone(),
                title: page.title.clone(),
                is_active: page.active,
                last_accessed: page.last_accessed,
            })
            .collect())
    }

    async fn active_tab_ids(&self) -> Result<HashSet<TabId>> {
        Ok(lock(&self.pages)
            .iter()
            .filter(|(_, page)| page.active)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn run_script(&self, tab: &TabId, script: &PageScript) -> Result<Value> {
        lock(&self.script_log).push((tab.clone(), script.name()));

        let mut pages = lock(&self.pages);
        let page = pages
            .get_mut(tab)
            .ok_or_else(|| Error::NotFound(format!("No tab with id {}", tab)))?;

        if page.restricted {
            return Err(Error::Script(format!(
                "Cannot access contents of url \"{}\"",
                page.url
            )));
        }

        match script {
            PageScript::Probe => Ok(json!(true)),
            PageScript::Freeze { .. } => {
                if page.reject_freeze {
                    return Err(Error::Script("Frame was detached".to_string()));
                }
                if page.overlays > 0 {
                    return Ok(json!(false));
                }
                page.overlays = 1;
                page.title = sleep_title(&page.title);
                Ok(json!(true))
            }
            PageScript::Unfreeze => {
                if page.overlays == 0 {
                    return Ok(json!(false));
                }
                page.reload();
                Ok(json!(true))
            }
            PageScript::ScrubPopups { .. } => {
                let removed = std::mem::take(&mut page.popups);
                Ok(json!(removed))
            }
            PageScript::IsFrozen => Ok(json!(page.overlays > 0)),
            PageScript::EmbeddedHosts => Ok(json!(page.embedded)),
        }
    }

    async fn all_cookies(&self) -> Result<Vec<RawCookie>> {
        Ok(lock(&self.cookies).clone())
    }

    async fn delete_cookies(&self, domain: &str, name: Option<&str>) -> Result<usize> {
        let mut cookies = lock(&self.cookies);
        let before = cookies.len();
        cookies.retain(|c| !(c.is_for_domain(domain) && name.map_or(true, |n| c.name == n)));
        Ok(before - cookies.len())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_double_freeze_leaves_one_overlay_and_one_glyph() {
        let host = MemoryTabHost::new();
        host.insert("t1", MemoryPage::new("https://example.com", "Example"));
        let freeze = PageScript::Freeze {
            icon_url: "icon.png".to_string(),
        };
        let tab = TabId::from("t1");

        assert_eq!(host.run_script(&tab, &freeze).await.unwrap(), json!(true));
        assert_eq!(host.run_script(&tab, &freeze).await.unwrap(), json!(false));

        let page = host.page("t1").unwrap();
        assert_eq!(page.overlays, 1);
        assert_eq!(page.title, "💤 Example");
        assert_eq!(page.title.matches("💤").count(), 1);
    }

    #[tokio::test]
    async fn test_restricted_page_rejects_probe() {
        let host = MemoryTabHost::new();
        host.insert("t1", MemoryPage::new("chrome://settings", "Settings").restricted());
        let err = host
            .run_script(&TabId::from("t1"), &PageScript::Probe)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Script(_)));
        assert_eq!(host.scripts_run("t1"), vec!["probe"]);
    }

    #[tokio::test]
    async fn test_title_change_does_not_lift_overlay() {
        let host = MemoryTabHost::new();
        host.insert("t1", MemoryPage::new("https://mail.example.com", "Inbox"));
        let tab = TabId::from("t1");
        host.run_script(
            &tab,
            &PageScript::Freeze {
                icon_url: "icon.png".to_string(),
            },
        )
        .await
        .unwrap();

        host.set_title("t1", "Inbox (1)");
        assert_eq!(host.run_script(&tab, &PageScript::IsFrozen).await.unwrap(), json!(true));
        host.reload("t1");
        assert_eq!(host.run_script(&tab, &PageScript::IsFrozen).await.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_delete_cookies_by_domain_and_name() {
        let host = MemoryTabHost::new();
        host.set_cookies(vec![
            RawCookie::new("sid", ".example.com", "/"),
            RawCookie::new("_ga", "www.example.com", "/"),
            RawCookie::new("sid", "other.org", "/"),
        ]);

        assert_eq!(host.delete_cookies("example.com", Some("sid")).await.unwrap(), 1);
        assert_eq!(host.delete_cookies("example.com", None).await.unwrap(), 1);
        let left: Vec<String> = host.cookies().into_iter().map(|c| c.domain).collect();
        assert_eq!(left, vec!["other.org"]);
    }

    #[tokio::test]
    async fn test_unfreeze_without_overlay_does_not_reload() {
        let host = MemoryTabHost::new();
        host.insert("t1", MemoryPage::new("https://example.com", "Example"));
        let result = host
            .run_script(&TabId::from("t1"), &PageScript::Unfreeze)
            .await
            .unwrap();
        assert_eq!(result, json!(false));
        assert_eq!(host.page("t1").unwrap().reloads, 0);
    }
}
