//! Two-phase freeze and unfreeze of a tab's page content.
//!
//! Freezing is destructive to in-page state: the overlay replaces the body
//! and waking the tab is a plain reload.

use serde::Serialize;
use std::sync::Arc;
use tabsentinel_core::script::DEFAULT_ICON_URL;
use tabsentinel_core::{PageScript, Result, TabHost, TabId, TabSnapshot};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::state::SuspendedSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FreezeOutcome {
    Frozen,
    /// The browser refused the probe. Nothing was claimed.
    Restricted,
    /// Another sweep claimed the tab between our check and our claim.
    AlreadyClaimed,
    /// The probe passed but the freeze script failed; the claim was released.
    Failed,
    /// The claim was released while the freeze script ran (an unfreeze or
    /// disable got there first), so the overlay was taken down again.
    Cancelled,
}

pub struct TabFreezer {
    host: Arc<dyn TabHost>,
    icon_url: String,
}

impl TabFreezer {
    pub fn new(host: Arc<dyn TabHost>, icon_url: Option<String>) -> Self {
        let icon_url = icon_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_ICON_URL.to_string());
        Self { host, icon_url }
    }

    pub fn icon_url(&self) -> &str {
        &self.icon_url
    }

    pub async fn freeze(
        &self,
        tab: &TabSnapshot,
        suspended: &RwLock<SuspendedSet>,
        now_ms: i64,
    ) -> FreezeOutcome {
        if let Err(e) = self.host.run_script(&tab.id, &PageScript::Probe).await {
            debug!(tab_id = %tab.id, url = %tab.url, error = %e, "Skipping tab (restricted)");
            return FreezeOutcome::Restricted;
        }

        // Claim before the visible mutation so a concurrent sweep backs off.
        if !suspended.write().await.claim(tab.id.clone(), now_ms) {
            debug!(tab_id = %tab.id, "Tab already claimed by another sweep");
            return FreezeOutcome::AlreadyClaimed;
        }

        let script = PageScript::Freeze {
            icon_url: self.icon_url.clone(),
        };
        match self.host.run_script(&tab.id, &script).await {
            Ok(_) => {
                if suspended.write().await.mark_frozen(&tab.id) {
                    return FreezeOutcome::Frozen;
                }
                debug!(tab_id = %tab.id, "Claim released during freeze, lifting overlay");
                if let Err(e) = self.host.run_script(&tab.id, &PageScript::Unfreeze).await {
                    warn!(tab_id = %tab.id, error = %e, "Failed to lift overlay after cancelled freeze");
                }
                FreezeOutcome::Cancelled
            }
            Err(e) => {
                suspended.write().await.release(&tab.id);
                warn!(tab_id = %tab.id, url = %tab.url, error = %e, "Freeze script failed after probe");
                FreezeOutcome::Failed
            }
        }
    }

    /// Reload the tab if it shows the overlay. The tab is released from
    /// `suspended` whether or not the script ran, so it becomes eligible again.
    pub async fn unfreeze(&self, tab: &TabId, suspended: &RwLock<SuspendedSet>) -> Result<bool> {
        let result = self.host.run_script(tab, &PageScript::Unfreeze).await;
        suspended.write().await.release(tab);
        let reloaded = result?.as_bool().unwrap_or(false);
        if reloaded {
            debug!(tab_id = %tab, "Unfroze tab");
        }
        Ok(reloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SuspendState;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashSet;
    use tabsentinel_core::{MemoryPage, MemoryTabHost, RawCookie};
    use tokio::sync::Notify;

    /// Holds every freeze script until `resume` is notified.
    struct SlowFreezeHost {
        inner: Arc<MemoryTabHost>,
        started: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl TabHost for SlowFreezeHost {
        async fn list_tabs(&self) -> Result<Vec<TabSnapshot>> {
            self.inner.list_tabs().await
        }

        async fn active_tab_ids(&self) -> Result<HashSet<TabId>> {
            self.inner.active_tab_ids().await
        }

        async fn run_script(&self, tab: &TabId, script: &PageScript) -> Result<Value> {
            if matches!(script, PageScript::Freeze { .. }) {
                self.started.notify_one();
                self.resume.notified().await;
            }
            self.inner.run_script(tab, script).await
        }

        async fn all_cookies(&self) -> Result<Vec<RawCookie>> {
            self.inner.all_cookies().await
        }

        async fn delete_cookies(&self, domain: &str, name: Option<&str>) -> Result<usize> {
            self.inner.delete_cookies(domain, name).await
        }
    }

    fn setup(page: MemoryPage) -> (Arc<MemoryTabHost>, TabFreezer, TabSnapshot) {
        let host = Arc::new(MemoryTabHost::new());
        let snapshot = TabSnapshot::new("t1", &page.url, &page.title);
        host.insert("t1", page);
        let freezer = TabFreezer::new(host.clone(), None);
        (host, freezer, snapshot)
    }

    #[tokio::test]
    async fn test_freeze_probes_then_claims_then_freezes() {
        let (host, freezer, tab) = setup(MemoryPage::new("https://example.org", "Docs"));
        let suspended = RwLock::new(SuspendedSet::new());

        let outcome = freezer.freeze(&tab, &suspended, 10).await;
        assert_eq!(outcome, FreezeOutcome::Frozen);
        assert_eq!(host.scripts_run("t1"), vec!["probe", "freeze"]);
        assert_eq!(
            suspended.read().await.get(&tab.id).unwrap().state,
            SuspendState::Frozen
        );
        assert_eq!(host.page("t1").unwrap().title, "💤 Docs");
    }

    #[tokio::test]
    async fn test_restricted_tab_is_not_claimed() {
        let (host, freezer, tab) =
            setup(MemoryPage::new("https://chromewebstore.google.com", "Store").restricted());
        let suspended = RwLock::new(SuspendedSet::new());

        assert_eq!(freezer.freeze(&tab, &suspended, 10).await, FreezeOutcome::Restricted);
        assert!(suspended.read().await.is_empty());
        assert_eq!(host.scripts_run("t1"), vec!["probe"]);
    }

    #[tokio::test]
    async fn test_failed_freeze_releases_claim() {
        let (_host, freezer, tab) =
            setup(MemoryPage::new("https://example.org", "Docs").reject_freeze());
        let suspended = RwLock::new(SuspendedSet::new());

        assert_eq!(freezer.freeze(&tab, &suspended, 10).await, FreezeOutcome::Failed);
        assert!(!suspended.read().await.contains(&tab.id));
    }

    #[tokio::test]
    async fn test_second_claim_backs_off() {
        let (host, freezer, tab) = setup(MemoryPage::new("https://example.org", "Docs"));
        let suspended = RwLock::new(SuspendedSet::new());
        suspended.write().await.claim(tab.id.clone(), 1);

        assert_eq!(
            freezer.freeze(&tab, &suspended, 10).await,
            FreezeOutcome::AlreadyClaimed
        );
        assert_eq!(host.scripts_run("t1"), vec!["probe"]);
        assert_eq!(host.page("t1").unwrap().overlays, 0);
    }

    #[tokio::test]
    async fn test_unfreeze_reloads_and_releases() {
        let (host, freezer, tab) = setup(MemoryPage::new("https://example.org", "Docs"));
        let suspended = RwLock::new(SuspendedSet::new());
        freezer.freeze(&tab, &suspended, 10).await;

        assert!(freezer.unfreeze(&tab.id, &suspended).await.unwrap());
        let page = host.page("t1").unwrap();
        assert_eq!(page.overlays, 0);
        assert_eq!(page.reloads, 1);
        assert_eq!(page.title, "Docs");
        assert!(suspended.read().await.is_empty());

        // Nothing to do the second time round.
        assert!(!freezer.unfreeze(&tab.id, &suspended).await.unwrap());
        assert_eq!(host.page("t1").unwrap().reloads, 1);
    }

    #[tokio::test]
    async fn test_unfreeze_error_still_releases() {
        let (host, freezer, tab) = setup(MemoryPage::new("https://example.org", "Docs"));
        let suspended = RwLock::new(SuspendedSet::new());
        suspended.write().await.claim(tab.id.clone(), 1);
        host.close("t1");

        assert!(freezer.unfreeze(&tab.id, &suspended).await.is_err());
        assert!(suspended.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unfreeze_during_freeze_lifts_late_overlay() {
        let inner = Arc::new(MemoryTabHost::new());
        inner.insert("t1", MemoryPage::new("https://example.org", "Docs"));
        let host = Arc::new(SlowFreezeHost {
            inner: inner.clone(),
            started: Notify::new(),
            resume: Notify::new(),
        });
        let freezer = TabFreezer::new(host.clone(), None);
        let tab = TabSnapshot::new("t1", "https://example.org", "Docs");
        let suspended = RwLock::new(SuspendedSet::new());

        let (outcome, reloaded) = tokio::join!(freezer.freeze(&tab, &suspended, 10), async {
            host.started.notified().await;
            // Nothing to reload yet: the overlay is not up.
            let reloaded = freezer.unfreeze(&tab.id, &suspended).await.unwrap();
            host.resume.notify_one();
            reloaded
        });

        assert!(!reloaded);
        assert_eq!(outcome, FreezeOutcome::Cancelled);
        assert!(suspended.read().await.is_empty());
        let page = inner.page("t1").unwrap();
        assert_eq!(page.overlays, 0);
        assert_eq!(page.title, "Docs");
        assert_eq!(inner.scripts_run("t1"), vec!["probe", "unfreeze", "freeze", "unfreeze"]);
    }

    #[test]
    fn test_blank_icon_falls_back_to_default() {
        let host = Arc::new(MemoryTabHost::new());
        let freezer = TabFreezer::new(host, Some("   ".to_string()));
        assert_eq!(freezer.icon_url(), DEFAULT_ICON_URL);
    }
}
