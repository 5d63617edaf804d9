use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tabsentinel_core::{PageScript, Policy, Result, SettingsStore, TabHost, TabId, TabSnapshot};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::eligibility::{decide, decide_immediate, Verdict};
use crate::freezer::{FreezeOutcome, TabFreezer};
use crate::state::{LoggedSet, SuspendedSet};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const DISABLED_LOG_KEY: &str = "sweep:disabled";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Policy was disabled; nothing else ran.
    pub skipped_disabled: bool,
    pub evaluated: usize,
    pub verdicts: BTreeMap<Verdict, usize>,
    pub frozen: Vec<TabId>,
    pub restricted: Vec<TabId>,
    pub failed: Vec<TabId>,
    /// Unfrozen by another command while the freeze script was running.
    pub cancelled: Vec<TabId>,
    /// Entries dropped by reconciliation before evaluation.
    pub released: Vec<TabId>,
}

impl SweepReport {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.verdicts.get(&verdict).copied().unwrap_or(0)
    }
}

/// One row of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabVerdict {
    pub id: TabId,
    pub url: String,
    pub title: String,
    pub verdict: Verdict,
    pub idle_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub suspended: Vec<TabId>,
    pub policy: Policy,
}

struct TimerHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Drives periodic sweeps and owns the suspended/logged bookkeeping.
pub struct SuspensionScheduler {
    host: Arc<dyn TabHost>,
    settings: Arc<dyn SettingsStore>,
    freezer: TabFreezer,
    suspended: RwLock<SuspendedSet>,
    logged: Mutex<LoggedSet>,
    interval: Duration,
    sleep_logs: bool,
    timer: StdMutex<Option<TimerHandle>>,
}

impl SuspensionScheduler {
    pub fn new(host: Arc<dyn TabHost>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            freezer: TabFreezer::new(host.clone(), None),
            host,
            settings,
            suspended: RwLock::new(SuspendedSet::new()),
            logged: Mutex::new(LoggedSet::new()),
            interval: DEFAULT_SWEEP_INTERVAL,
            sleep_logs: false,
            timer: StdMutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_icon_url(mut self, icon_url: Option<String>) -> Self {
        self.freezer = TabFreezer::new(self.host.clone(), icon_url);
        self
    }

    pub fn with_sleep_logs(mut self, enabled: bool) -> Self {
        self.sleep_logs = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the periodic timer. Returns false if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut timer = self.timer_guard();
        if timer.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return false;
        }

        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(self.clone().run_loop(rx));
        *timer = Some(TimerHandle { shutdown, task });
        true
    }

    /// Stop the timer. A sweep already in progress runs to completion.
    /// Returns false if the timer was not running.
    pub fn stop(&self) -> bool {
        match self.timer_guard().take() {
            Some(handle) => {
                let _ = handle.shutdown.send(());
                !handle.task.is_finished()
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer_guard()
            .as_ref()
            .is_some_and(|t| !t.task.is_finished())
    }

    fn timer_guard(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Suspension scheduler started");

        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Suspension scheduler stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if !report.skipped_disabled => {
                            debug!(
                                evaluated = report.evaluated,
                                frozen = report.frozen.len(),
                                restricted = report.restricted.len(),
                                released = report.released.len(),
                                "Sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Sweep failed"),
                    }
                }
            }
        }
    }

    /// One full pass over every open tab.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let policy = Policy::load(self.settings.as_ref()).await?;
        let mut report = SweepReport::default();

        if !policy.enabled {
            if self.logged.lock().await.first_time(DISABLED_LOG_KEY) {
                info!("Suspension disabled in settings, skipping sweeps");
            }
            report.skipped_disabled = true;
            return Ok(report);
        }
        self.logged.lock().await.forget(DISABLED_LOG_KEY);

        let tabs = self.observe().await?;
        report.released = self.reconcile(&tabs).await;
        report.evaluated = tabs.len();

        let now = now_ms();
        let mut candidates = Vec::new();
        {
            let suspended = self.suspended.read().await;
            for tab in &tabs {
                let verdict = decide(tab, &policy, now, &suspended);
                *report.verdicts.entry(verdict).or_default() += 1;
                if verdict.is_suspend() {
                    candidates.push(tab);
                }
            }
        }

        self.freeze_candidates(&candidates, now, &mut report).await;
        Ok(report)
    }

    /// Freeze every non-active eligible tab, ignoring idle time and the
    /// enabled flag.
    pub async fn freeze_all(&self) -> Result<SweepReport> {
        let policy = Policy::load(self.settings.as_ref()).await?;
        let tabs = self.observe().await?;
        let mut report = SweepReport {
            released: self.reconcile(&tabs).await,
            evaluated: tabs.len(),
            ..SweepReport::default()
        };

        let mut candidates = Vec::new();
        {
            let suspended = self.suspended.read().await;
            for tab in &tabs {
                let verdict = decide_immediate(tab, &policy, &suspended);
                *report.verdicts.entry(verdict).or_default() += 1;
                if verdict.is_suspend() {
                    candidates.push(tab);
                }
            }
        }

        self.freeze_candidates(&candidates, now_ms(), &mut report).await;
        info!(frozen = report.frozen.len(), "Freeze-all finished");
        Ok(report)
    }

    async fn freeze_candidates(&self, candidates: &[&TabSnapshot], now: i64, report: &mut SweepReport) {
        let outcomes = join_all(
            candidates
                .iter()
                .map(|tab| self.freezer.freeze(tab, &self.suspended, now)),
        )
        .await;

        for (tab, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                FreezeOutcome::Frozen => {
                    self.log_suspended(tab).await;
                    report.frozen.push(tab.id.clone());
                }
                FreezeOutcome::Restricted => report.restricted.push(tab.id.clone()),
                FreezeOutcome::Failed => report.failed.push(tab.id.clone()),
                FreezeOutcome::Cancelled => report.cancelled.push(tab.id.clone()),
                FreezeOutcome::AlreadyClaimed => {}
            }
        }
    }

    /// Reload every tab that shows the overlay and empty the suspended set.
    /// Returns the number of tabs reloaded.
    pub async fn unfreeze_all(&self) -> Result<usize> {
        let tabs = self.host.list_tabs().await?;
        let results = join_all(
            tabs.iter()
                .map(|tab| self.freezer.unfreeze(&tab.id, &self.suspended)),
        )
        .await;

        let mut reloaded = 0;
        for (tab, result) in tabs.iter().zip(results) {
            match result {
                Ok(true) => reloaded += 1,
                Ok(false) => {}
                Err(e) => debug!(tab_id = %tab.id, error = %e, "Unfreeze skipped"),
            }
        }

        let leftovers = self.suspended.write().await.clear();
        let mut logged = self.logged.lock().await;
        for id in tabs.iter().map(|t| &t.id).chain(leftovers.iter()) {
            logged.forget(id.as_str());
        }
        drop(logged);

        info!(reloaded, "Unfroze all tabs");
        Ok(reloaded)
    }

    /// Stop the timer and wake every frozen tab.
    pub async fn disable(&self) -> Result<usize> {
        self.stop();
        self.unfreeze_all().await
    }

    /// A tab went away (closed, crashed or detached).
    pub async fn on_tab_closed(&self, id: &TabId) {
        if self.suspended.write().await.release(id) {
            debug!(tab_id = %id, "Released closed tab");
        }
        self.logged.lock().await.forget(id.as_str());
    }

    pub async fn suspended_ids(&self) -> Vec<TabId> {
        self.suspended.read().await.ids()
    }

    pub async fn current_policy(&self) -> Result<Policy> {
        Policy::load(self.settings.as_ref()).await
    }

    /// Evaluate every tab without freezing anything.
    pub async fn explain(&self) -> Result<Vec<TabVerdict>> {
        let policy = Policy::load(self.settings.as_ref()).await?;
        let tabs = self.observe().await?;
        let now = now_ms();
        let suspended = self.suspended.read().await;
        Ok(tabs
            .into_iter()
            .map(|tab| TabVerdict {
                verdict: decide(&tab, &policy, now, &suspended),
                idle_ms: tab.last_accessed.map(|at| now.saturating_sub(at)),
                id: tab.id,
                url: tab.url,
                title: tab.title,
            })
            .collect())
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        Ok(SchedulerStatus {
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            suspended: self.suspended_ids().await,
            policy: self.current_policy().await?,
        })
    }

    async fn observe(&self) -> Result<Vec<TabSnapshot>> {
        let (mut tabs, active): (Vec<TabSnapshot>, HashSet<TabId>) =
            tokio::try_join!(self.host.list_tabs(), self.host.active_tab_ids())?;
        for tab in &mut tabs {
            tab.is_active = tab.is_active || active.contains(&tab.id);
        }
        Ok(tabs)
    }

    async fn reconcile(&self, tabs: &[TabSnapshot]) -> Vec<TabId> {
        let reconciled = self.suspended.write().await.reconcile(tabs);
        let mut released = reconciled.released;

        // A frozen tab without the glyph may only have had its title
        // rewritten by the page. It is released once the overlay is gone.
        let checks = join_all(
            reconciled
                .unconfirmed
                .iter()
                .map(|id| self.host.run_script(id, &PageScript::IsFrozen)),
        )
        .await;
        {
            let mut suspended = self.suspended.write().await;
            for (id, check) in reconciled.unconfirmed.into_iter().zip(checks) {
                match check {
                    Ok(value) if value.as_bool() == Some(false) => {
                        if suspended.release_frozen(&id) {
                            released.push(id);
                        }
                    }
                    Ok(_) => debug!(tab_id = %id, "Title changed but overlay is still up"),
                    Err(e) => debug!(tab_id = %id, error = %e, "Overlay check failed, keeping tab"),
                }
            }
        }
        released.sort();

        if !released.is_empty() {
            let mut logged = self.logged.lock().await;
            for id in &released {
                logged.forget(id.as_str());
            }
            debug!(count = released.len(), "Released reloaded or closed tabs");
        }
        released
    }

    async fn log_suspended(&self, tab: &TabSnapshot) {
        if !self.logged.lock().await.first_time(tab.id.as_str()) {
            return;
        }
        if self.sleep_logs {
            info!(tab_id = %tab.id, url = %tab.url, "Suspended tab");
        } else {
            debug!(tab_id = %tab.id, url = %tab.url, "Suspended tab");
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabsentinel_core::{MemoryPage, MemorySettings, MemoryTabHost};

    fn minutes_ago(minutes: i64) -> i64 {
        now_ms() - minutes * 60_000
    }

    fn scheduler(host: &Arc<MemoryTabHost>, settings: serde_json::Value) -> Arc<SuspensionScheduler> {
        let settings = Arc::new(MemorySettings::from_value(settings));
        Arc::new(SuspensionScheduler::new(host.clone(), settings))
    }

    fn five_minute_policy() -> serde_json::Value {
        json!({ "suspendTime": 300_000 })
    }

    #[tokio::test]
    async fn test_sweep_freezes_only_idle_eligible_tabs() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("idle", MemoryPage::new("https://example.org", "Idle").last_accessed(minutes_ago(10)));
        host.insert("fresh", MemoryPage::new("https://example.org/a", "Fresh").last_accessed(minutes_ago(1)));
        host.insert("focused", MemoryPage::new("https://example.org/b", "Focused").active());
        host.insert("settings", MemoryPage::new("chrome://settings", "Settings").restricted());
        host.insert("mail", MemoryPage::new("https://mail.example.com", "Mail").last_accessed(minutes_ago(60)));

        let mut settings = five_minute_policy();
        settings["excludedSites"] = json!(["mail.example.com"]);
        let scheduler = scheduler(&host, settings);

        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.evaluated, 5);
        assert_eq!(report.frozen, vec![TabId::from("idle")]);
        assert_eq!(report.count(Verdict::SkipTooRecent), 1);
        assert_eq!(report.count(Verdict::SkipActive), 1);
        assert_eq!(report.count(Verdict::SkipExcludedScheme), 1);
        assert_eq!(report.count(Verdict::SkipExcludedHost), 1);
        assert_eq!(host.page("idle").unwrap().title, "💤 Idle");
        assert_eq!(host.page("fresh").unwrap().overlays, 0);
        assert!(host.scripts_run("settings").is_empty());
        assert_eq!(scheduler.suspended_ids().await, vec![TabId::from("idle")]);
    }

    #[tokio::test]
    async fn test_second_sweep_does_not_retarget_frozen_tab() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://example.org", "Doc").last_accessed(minutes_ago(10)));
        let scheduler = scheduler(&host, five_minute_policy());

        scheduler.sweep().await.unwrap();
        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.count(Verdict::SkipAlreadySuspended), 1);
        assert!(report.frozen.is_empty());
        assert_eq!(host.scripts_run("t1"), vec!["probe", "freeze"]);
    }

    #[tokio::test]
    async fn test_reload_round_trip_makes_tab_idle_again() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://example.org", "Doc").last_accessed(minutes_ago(10)));
        let scheduler = scheduler(&host, five_minute_policy());

        scheduler.sweep().await.unwrap();
        host.reload("t1");
        host.set_active("t1", true);

        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.released, vec![TabId::from("t1")]);
        assert_eq!(report.count(Verdict::SkipActive), 1);
        assert!(scheduler.suspended_ids().await.is_empty());
        assert_eq!(host.page("t1").unwrap().title, "Doc");
    }

    #[tokio::test]
    async fn test_retitled_frozen_tab_stays_suspended() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://mail.example.org", "Inbox").last_accessed(minutes_ago(10)));
        let scheduler = scheduler(&host, five_minute_policy());

        scheduler.sweep().await.unwrap();
        host.set_title("t1", "Inbox (1)");

        for _ in 0..2 {
            let report = scheduler.sweep().await.unwrap();
            assert!(report.released.is_empty());
            assert!(report.frozen.is_empty());
            assert_eq!(report.count(Verdict::SkipAlreadySuspended), 1);
        }
        assert_eq!(scheduler.suspended_ids().await, vec![TabId::from("t1")]);
        assert_eq!(
            host.scripts_run("t1"),
            vec!["probe", "freeze", "is_frozen", "is_frozen"]
        );

        // A real reload is still noticed.
        host.reload("t1");
        host.set_title("t1", "Inbox (2)");
        host.set_active("t1", true);
        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.released, vec![TabId::from("t1")]);
        assert!(scheduler.suspended_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_restricted_tab_is_retried_next_sweep() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert(
            "store",
            MemoryPage::new("https://chromewebstore.google.com", "Store")
                .restricted()
                .last_accessed(minutes_ago(30)),
        );
        let scheduler = scheduler(&host, five_minute_policy());

        let first = scheduler.sweep().await.unwrap();
        assert_eq!(first.restricted, vec![TabId::from("store")]);
        let second = scheduler.sweep().await.unwrap();
        assert_eq!(second.restricted, vec![TabId::from("store")]);
        assert_eq!(host.scripts_run("store"), vec!["probe", "probe"]);
        assert!(scheduler.suspended_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_sweep() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert(
            "broken",
            MemoryPage::new("https://a.example.org", "A").reject_freeze().last_accessed(minutes_ago(10)),
        );
        host.insert("ok", MemoryPage::new("https://b.example.org", "B").last_accessed(minutes_ago(10)));
        let scheduler = scheduler(&host, five_minute_policy());

        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.failed, vec![TabId::from("broken")]);
        assert_eq!(report.frozen, vec![TabId::from("ok")]);
        assert_eq!(scheduler.suspended_ids().await, vec![TabId::from("ok")]);
    }

    #[tokio::test]
    async fn test_disabled_policy_skips_sweep() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://example.org", "Doc").last_accessed(minutes_ago(90)));
        let scheduler = scheduler(&host, json!({ "extensionEnabled": false }));

        let report = scheduler.sweep().await.unwrap();
        assert!(report.skipped_disabled);
        assert_eq!(report.evaluated, 0);
        assert!(host.scripts_run("t1").is_empty());
    }

    #[tokio::test]
    async fn test_freeze_all_ignores_idle_time_and_active_tab() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("recent", MemoryPage::new("https://example.org", "Recent").last_accessed(now_ms()));
        host.insert("focused", MemoryPage::new("https://example.org/f", "Focused").active());
        host.insert("pdf", MemoryPage::new("https://example.org/a.pdf", "Paper"));
        let scheduler = scheduler(&host, json!({ "extensionEnabled": false }));

        let report = scheduler.freeze_all().await.unwrap();
        assert_eq!(report.frozen, vec![TabId::from("recent")]);
        assert_eq!(host.page("focused").unwrap().overlays, 0);
        assert_eq!(host.page("pdf").unwrap().overlays, 0);
    }

    #[tokio::test]
    async fn test_unfreeze_all_reloads_overlays_and_clears_state() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("a", MemoryPage::new("https://a.example.org", "A"));
        host.insert("b", MemoryPage::new("https://b.example.org", "B"));
        host.insert("c", MemoryPage::new("chrome://newtab", "New Tab").restricted());
        let scheduler = scheduler(&host, json!({}));

        assert_eq!(scheduler.freeze_all().await.unwrap().frozen.len(), 2);
        assert_eq!(scheduler.unfreeze_all().await.unwrap(), 2);
        assert!(scheduler.suspended_ids().await.is_empty());
        assert_eq!(host.page("a").unwrap().reloads, 1);
        assert_eq!(host.page("a").unwrap().title, "A");
        assert_eq!(host.page("c").unwrap().reloads, 0);
    }

    #[tokio::test]
    async fn test_closed_tab_is_released() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://example.org", "Doc"));
        let scheduler = scheduler(&host, json!({}));

        scheduler.freeze_all().await.unwrap();
        host.close("t1");
        scheduler.on_tab_closed(&TabId::from("t1")).await;
        assert!(scheduler.suspended_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_explain_does_not_freeze() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert("t1", MemoryPage::new("https://example.org", "Doc").last_accessed(minutes_ago(10)));
        let scheduler = scheduler(&host, five_minute_policy());

        let rows = scheduler.explain().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].verdict, Verdict::Suspend);
        assert!(rows[0].idle_ms.unwrap() >= 600_000);
        assert!(host.scripts_run("t1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let host = Arc::new(MemoryTabHost::new());
        let scheduler = scheduler(&host, json!({}));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!scheduler.is_running());
        assert!(scheduler.start());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_sweeps_after_each_interval() {
        let host = Arc::new(MemoryTabHost::new());
        host.insert(
            "t1",
            MemoryPage::new("https://example.org", "Doc").last_accessed(minutes_ago(120)),
        );
        let scheduler = Arc::new(
            SuspensionScheduler::new(host.clone(), Arc::new(MemorySettings::new()))
                .with_interval(Duration::from_secs(30)),
        );

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(host.scripts_run("t1").is_empty());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(host.scripts_run("t1"), vec!["probe", "freeze"]);

        scheduler.stop();
        host.reload("t1");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(host.scripts_run("t1").len(), 2);
    }
}
