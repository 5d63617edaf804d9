//! [`TabHost`] backed by a live browser over CDP.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tabsentinel_core::tab::UNKNOWN_IDLE_FALLBACK_MS;
use tabsentinel_core::{Error, PageScript, RawCookie, Result, TabHost, TabId, TabSnapshot};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::cdp::{evaluation_value, CdpClient};

const VISIBILITY_STATE: &str = "document.visibilityState";

/// When each tab was last seen in use. CDP has no notion of "last
/// accessed", so this is built from our own observations.
#[derive(Debug, Default)]
pub struct AccessTracker {
    first_seen: HashMap<TabId, i64>,
    last_active: HashMap<TabId, i64>,
}

impl AccessTracker {
    /// Record a listing. Returns the last-accessed time for `id`: the last
    /// time it was active, or the baseline assumed when it first appeared.
    /// Unknown on the very first sighting.
    pub fn observe(&mut self, id: &TabId, now_ms: i64) -> Option<i64> {
        if let Some(at) = self.last_active.get(id) {
            return Some(*at);
        }
        match self.first_seen.get(id) {
            Some(baseline) => Some(*baseline),
            None => {
                self.first_seen
                    .insert(id.clone(), now_ms - UNKNOWN_IDLE_FALLBACK_MS);
                None
            }
        }
    }

    pub fn mark_active(&mut self, id: &TabId, now_ms: i64) {
        self.last_active.insert(id.clone(), now_ms);
    }

    pub fn retain(&mut self, open: &HashSet<TabId>) {
        self.first_seen.retain(|id, _| open.contains(id));
        self.last_active.retain(|id, _| open.contains(id));
    }

    pub fn forget(&mut self, id: &TabId) {
        self.first_seen.remove(id);
        self.last_active.remove(id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabWindow {
    pub window_id: i64,
    pub minimized: bool,
}

/// How one tab looked during an active-tab check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabView {
    pub id: TabId,
    pub visible: bool,
    pub window: Option<TabWindow>,
}

/// Tabs in front of their window. Every tab of a minimized window reports
/// `hidden`, so the tab last seen visible there stays in front. `fronts`
/// remembers that tab per window across calls.
pub fn front_tabs(views: &[TabView], fronts: &mut HashMap<i64, TabId>) -> HashSet<TabId> {
    let mut active = HashSet::new();
    for view in views.iter().filter(|v| v.visible) {
        if let Some(window) = view.window {
            fronts.insert(window.window_id, view.id.clone());
        }
        active.insert(view.id.clone());
    }
    for view in views.iter().filter(|v| !v.visible) {
        if let Some(window) = view.window.filter(|w| w.minimized) {
            if fronts.get(&window.window_id) == Some(&view.id) {
                active.insert(view.id.clone());
            }
        }
    }
    fronts.retain(|window_id, id| {
        views
            .iter()
            .any(|v| &v.id == id && v.window.map(|w| w.window_id) == Some(*window_id))
    });
    active
}

#[derive(Default)]
struct HostState {
    /// targetId -> flattened session id.
    sessions: HashMap<TabId, String>,
    access: AccessTracker,
    /// windowId -> tab last seen visible in it.
    fronts: HashMap<i64, TabId>,
}

pub struct CdpTabHost {
    cdp: Arc<CdpClient>,
    state: Arc<Mutex<HostState>>,
}

impl CdpTabHost {
    pub fn new(cdp: Arc<CdpClient>) -> Self {
        Self {
            cdp,
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Stream of tabs that were closed or crashed. Cached sessions for
    /// those tabs are dropped as the events arrive.
    pub async fn closed_tabs(&self) -> Result<mpsc::Receiver<TabId>> {
        self.cdp
            .set_discover_targets(true)
            .await
            .map_err(Error::Browser)?;
        let mut destroyed = self.cdp.subscribe_event("Target.targetDestroyed").await;
        let mut crashed = self.cdp.subscribe_event("Target.targetCrashed").await;
        let mut detached = self.cdp.subscribe_event("Target.detachedFromTarget").await;

        let (tx, rx) = mpsc::channel(64);
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                let (params, gone) = tokio::select! {
                    Some(p) = destroyed.recv() => (p, true),
                    Some(p) = crashed.recv() => (p, true),
                    Some(p) = detached.recv() => (p, false),
                    else => break,
                };

                if !gone {
                    // The tab lives on; only the session is stale.
                    if let Some(session) = params.get("sessionId").and_then(|v| v.as_str()) {
                        state.lock().await.sessions.retain(|_, s| s != session);
                    }
                    continue;
                }

                let Some(id) = params.get("targetId").and_then(|v| v.as_str()) else {
                    continue;
                };
                let id = TabId::from(id);
                {
                    let mut state = state.lock().await;
                    state.sessions.remove(&id);
                    state.access.forget(&id);
                }
                if tx.send(id).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn page_targets(&self) -> Result<Vec<Value>> {
        let targets = self.cdp.get_targets().await.map_err(Error::Browser)?;
        Ok(targets.into_iter().filter(is_tab_target).collect())
    }

    async fn session_for(&self, tab: &TabId) -> Result<String> {
        if let Some(session) = self.state.lock().await.sessions.get(tab) {
            return Ok(session.clone());
        }
        let session = self
            .cdp
            .attach_to_target(tab.as_str())
            .await
            .map_err(Error::Browser)?;
        self.state
            .lock()
            .await
            .sessions
            .insert(tab.clone(), session.clone());
        Ok(session)
    }

    async fn evaluate(&self, tab: &TabId, expression: &str) -> Result<Value> {
        let session = self.session_for(tab).await?;
        let result = match self.cdp.evaluate_in_session(&session, expression).await {
            Ok(result) => result,
            Err(e) if is_stale_session(&e) => {
                debug!(tab_id = %tab, "Session went stale, re-attaching");
                self.state.lock().await.sessions.remove(tab);
                let session = self.session_for(tab).await?;
                self.cdp
                    .evaluate_in_session(&session, expression)
                    .await
                    .map_err(Error::Browser)?
            }
            Err(e) => return Err(Error::Browser(e)),
        };
        evaluation_value(&result).map_err(Error::Script)
    }
}

#[async_trait]
impl TabHost for CdpTabHost {
    async fn list_tabs(&self) -> Result<Vec<TabSnapshot>> {
        let targets = self.page_targets().await?;
        let now = Utc::now().timestamp_millis();

        let mut state = self.state.lock().await;
        let open: HashSet<TabId> = targets.iter().filter_map(target_id).collect();
        state.sessions.retain(|id, _| open.contains(id));
        state.access.retain(&open);

        Ok(targets
            .iter()
            .filter_map(|target| {
                let id = target_id(target)?;
                let last_accessed = state.access.observe(&id, now);
                Some(TabSnapshot {
                    url: str_field(target, "url"),
                    title: str_field(target, "title"),
                    is_active: false,
                    last_accessed,
                    id,
                })
            })
            .collect())
    }

    async fn active_tab_ids(&self) -> Result<HashSet<TabId>> {
        let ids: Vec<TabId> = self
            .page_targets()
            .await?
            .iter()
            .filter_map(target_id)
            .collect();

        let views = join_all(ids.into_iter().map(|id| async move {
            let (visibility, window) = tokio::join!(
                self.evaluate(&id, VISIBILITY_STATE),
                self.cdp.get_window_for_target(id.as_str())
            );
            let visible = match visibility {
                Ok(Value::String(s)) => s == "visible",
                Ok(_) => false,
                Err(e) => {
                    debug!(tab_id = %id, error = %e, "Visibility check failed");
                    false
                }
            };
            let window = match window {
                Ok((window_id, state)) => Some(TabWindow {
                    window_id,
                    minimized: state == "minimized",
                }),
                Err(e) => {
                    debug!(tab_id = %id, error = %e, "Window lookup failed");
                    None
                }
            };
            TabView { id, visible, window }
        }))
        .await;
        let now = Utc::now().timestamp_millis();

        let mut state = self.state.lock().await;
        let active = front_tabs(&views, &mut state.fronts);
        for id in &active {
            state.access.mark_active(id, now);
        }
        Ok(active)
    }

    async fn run_script(&self, tab: &TabId, script: &PageScript) -> Result<Value> {
        self.evaluate(tab, &script.source()).await
    }

    async fn all_cookies(&self) -> Result<Vec<RawCookie>> {
        let cookies = self.cdp.get_all_cookies().await.map_err(Error::Browser)?;
        Ok(cookies
            .into_iter()
            .filter_map(|c| match serde_json::from_value::<RawCookie>(c) {
                Ok(cookie) => Some(cookie),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed cookie");
                    None
                }
            })
            .collect())
    }

    async fn delete_cookies(&self, domain: &str, name: Option<&str>) -> Result<usize> {
        let doomed: Vec<RawCookie> = self
            .all_cookies()
            .await?
            .into_iter()
            .filter(|c| c.is_for_domain(domain) && name.map_or(true, |n| c.name == n))
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let tab = self
            .page_targets()
            .await?
            .iter()
            .find_map(target_id)
            .ok_or_else(|| Error::Browser("No open tab to delete cookies through".to_string()))?;
        let session = self.session_for(&tab).await?;

        let mut deleted = 0;
        for cookie in &doomed {
            match self
                .cdp
                .delete_cookie_in_session(&session, &cookie.name, &cookie.domain, &cookie.path)
                .await
            {
                Ok(()) => deleted += 1,
                Err(e) => warn!(name = %cookie.name, domain = %cookie.domain, error = %e, "Cookie not deleted"),
            }
        }
        debug!(domain, deleted, "Deleted cookies");
        Ok(deleted)
    }
}

/// Regular tabs only: no devtools windows, extension pages or workers.
fn is_tab_target(target: &Value) -> bool {
    target.get("type").and_then(|v| v.as_str()) == Some("page")
        && !str_field(target, "url").starts_with("devtools://")
}

fn target_id(target: &Value) -> Option<TabId> {
    target
        .get("targetId")
        .and_then(|v| v.as_str())
        .map(TabId::from)
}

fn str_field(target: &Value, key: &str) -> String {
    target
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn is_stale_session(error: &str) -> bool {
    error.contains("No session with given id") || error.contains("Session with given id not found")
}
