//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Connects to the browser-level debugging endpoint. Per-tab commands go
//! through flattened target sessions: the same socket carries every
//! session, and each command names its session with `sessionId`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

/// Every command gives up after this long. A timed-out probe is treated
/// like a restricted tab and retried on the next sweep.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// A frame read from the socket.
#[derive(Debug, PartialEq)]
enum Incoming {
    Response { id: u64, body: Value },
    Event { method: String, params: Value },
}

fn parse_incoming(text: &str) -> Option<Incoming> {
    let val: Value = serde_json::from_str(text).ok()?;
    if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
        return Some(Incoming::Response { id, body: val });
    }
    let method = val.get("method").and_then(|v| v.as_str())?.to_string();
    let mut params = val.get("params").cloned().unwrap_or(Value::Null);
    // Session-scoped events carry their session beside the params.
    if let (Some(session), Value::Object(map)) = (val.get("sessionId"), &mut params) {
        map.entry("sessionId").or_insert_with(|| session.clone());
    }
    Some(Incoming::Event { method, params })
}

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    event_listeners: Listeners,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, String> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!(error = %e, "CDP WebSocket write error");
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match parse_incoming(&text) {
                        Some(Incoming::Response { id, body }) => {
                            if let Some(tx) = pending_clone.lock().await.remove(&id) {
                                let _ = tx.send(body);
                            }
                        }
                        Some(Incoming::Event { method, params }) => {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(&method) {
                                senders.retain(|tx| !tx.is_closed());
                                for tx in senders.iter() {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                        None => {}
                    },
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "CDP WebSocket read error");
                        break;
                    }
                    _ => {}
                }
            }
            // Fail outstanding commands instead of letting them wait for the timeout.
            pending_clone.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a browser-level CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, String> {
        self.dispatch(None, method, params).await
    }

    /// Send a command to an attached target session.
    pub async fn send_session_command(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, String> {
        self.dispatch(Some(session_id), method, params).await
    }

    async fn dispatch(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(format!("Failed to send CDP command: {}", e));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(format!("CDP error: {}", error))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err("CDP response channel closed".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                ))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    // ─── Targets ──────────────────────────────────────────────────────

    pub async fn get_targets(&self) -> Result<Vec<Value>, String> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Ask the browser to emit `Target.targetCreated`/`targetDestroyed`.
    pub async fn set_discover_targets(&self, discover: bool) -> Result<(), String> {
        self.send_command("Target.setDiscoverTargets", json!({"discover": discover}))
            .await?;
        Ok(())
    }

    /// Attach to a target with a flattened session and return its session id.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<String, String> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "No sessionId returned from attachToTarget".to_string())
    }

    /// Window holding `target_id`, with its state (normal, minimized, ...).
    pub async fn get_window_for_target(&self, target_id: &str) -> Result<(i64, String), String> {
        let result = self
            .send_command("Browser.getWindowForTarget", json!({"targetId": target_id}))
            .await?;
        let window_id = result
            .get("windowId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| "No windowId returned from getWindowForTarget".to_string())?;
        let state = result
            .pointer("/bounds/windowState")
            .and_then(|v| v.as_str())
            .unwrap_or("normal")
            .to_string();
        Ok((window_id, state))
    }

    // ─── Runtime ──────────────────────────────────────────────────────

    /// Evaluate JavaScript in an attached page and return the raw
    /// `Runtime.evaluate` result.
    pub async fn evaluate_in_session(
        &self,
        session_id: &str,
        expression: &str,
    ) -> Result<Value, String> {
        self.send_session_command(
            session_id,
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
                "userGesture": false,
            }),
        )
        .await
    }

    // ─── Storage ──────────────────────────────────────────────────────

    /// Every cookie in the default browser context.
    pub async fn get_all_cookies(&self) -> Result<Vec<Value>, String> {
        let result = self.send_command("Storage.getCookies", json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Delete one cookie. `Network` is a page domain, so this goes through
    /// an attached session; the cookie jar is shared by the whole context.
    pub async fn delete_cookie_in_session(
        &self,
        session_id: &str,
        name: &str,
        domain: &str,
        path: &str,
    ) -> Result<(), String> {
        self.send_session_command(
            session_id,
            "Network.deleteCookies",
            json!({"name": name, "domain": domain, "path": path}),
        )
        .await?;
        Ok(())
    }

    pub async fn close_browser(&self) -> Result<(), String> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// Unwrap a `Runtime.evaluate` result into the value the script returned.
/// A thrown exception becomes an error carrying its description.
pub fn evaluation_value(result: &Value) -> Result<Value, String> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(|v| v.as_str())
            .or_else(|| details.get("text").and_then(|v| v.as_str()))
            .unwrap_or("script threw");
        return Err(message.to_string());
    }
    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}
