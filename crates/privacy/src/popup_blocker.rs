//! Removes cookie banners, consent modals and similar overlays from open tabs.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tabsentinel_core::settings::{keys, SettingsStore};
use tabsentinel_core::{PageScript, Result, TabHost};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub const SELECTORS: &[&str] = &[
    "[id*='cookie']",
    "[class*='cookie']",
    "[id*='consent']",
    "[class*='consent']",
    "[id*='popup']",
    "[class*='popup']",
    "[id*='overlay']",
    "[class*='overlay']",
    "[role='dialog']",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrubReport {
    pub enabled: bool,
    pub tabs: usize,
    pub removed: u64,
    /// Running total across all scrubs, as stored in settings.
    pub total: u64,
}

pub struct PopupBlocker {
    host: Arc<dyn TabHost>,
    settings: Arc<dyn SettingsStore>,
    // Serializes the read-add-write of the running total.
    tally: Mutex<()>,
}

impl PopupBlocker {
    pub fn new(host: Arc<dyn TabHost>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            host,
            settings,
            tally: Mutex::new(()),
        }
    }

    pub fn script() -> PageScript {
        PageScript::ScrubPopups {
            selectors: SELECTORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Only an explicit `false` turns the blocker off.
    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(!matches!(
            self.settings.get(keys::POPUP_BLOCKER_ENABLED).await?,
            Some(Value::Bool(false))
        ))
    }

    pub async fn total_blocked(&self) -> Result<u64> {
        Ok(self
            .settings
            .get(keys::POPUP_BLOCKED_TOTAL)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    /// Run the scrubber on every open tab.
    pub async fn scrub_all(&self) -> Result<ScrubReport> {
        if !self.is_enabled().await? {
            debug!("Popup blocker disabled, skipping scrub");
            return Ok(ScrubReport {
                total: self.total_blocked().await?,
                ..ScrubReport::default()
            });
        }

        let tabs = self.host.list_tabs().await?;
        let script = Self::script();
        let results = join_all(tabs.iter().map(|tab| self.host.run_script(&tab.id, &script))).await;

        let mut removed = 0u64;
        for (tab, result) in tabs.iter().zip(results) {
            match result {
                Ok(count) => removed += count.as_u64().unwrap_or(0),
                Err(e) => debug!(tab_id = %tab.id, error = %e, "Popup scrub skipped"),
            }
        }

        let _guard = self.tally.lock().await;
        let total = self.total_blocked().await? + removed;
        if removed > 0 {
            self.settings
                .set(keys::POPUP_BLOCKED_TOTAL, json!(total))
                .await?;
            info!(removed, total, "Removed popups");
        }

        Ok(ScrubReport {
            enabled: true,
            tabs: tabs.len(),
            removed,
            total,
        })
    }

    /// Scrub every open tab each `every` until `shutdown` fires. The enabled
    /// flag is read on each tick, so toggling it needs no restart.
    pub async fn run_auto(self: Arc<Self>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
        debug!(every_secs = every.as_secs(), "Popup blocker loop started");

        let start = tokio::time::Instant::now() + every;
        let mut interval = tokio::time::interval_at(start, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.scrub_all().await {
                        warn!(error = %e, "Popup scrub failed");
                    }
                }
            }
        }
        debug!("Popup blocker loop stopped");
    }
}
