//! Getting hold of a browser: attach to one that already exposes a
//! remote-debugging port, or launch one with its own profile.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabsentinel_core::config::BrowserConfig;
use tabsentinel_core::{Error, Paths, Result};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::cdp::CdpClient;
use crate::host::CdpTabHost;

/// Supported browser engines. All of them speak CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Chrome,
    Chromium,
    Edge,
}

impl BrowserEngine {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chrome" | "google-chrome" => Some(Self::Chrome),
            "chromium" => Some(Self::Chromium),
            "edge" | "msedge" => Some(Self::Edge),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Edge => "edge",
        }
    }
}

/// A browser-level CDP connection, plus the process if we started it.
pub struct BrowserSession {
    pub engine: Option<BrowserEngine>,
    pub debug_port: u16,
    pub cdp: Arc<CdpClient>,
    pub user_data_dir: Option<PathBuf>,
    process: Option<Child>,
}

impl BrowserSession {
    /// Attach or launch according to `config.browser`.
    pub async fn connect(config: &BrowserConfig, paths: &Paths) -> Result<Self> {
        if config.launch {
            let engine = BrowserEngine::parse(&config.engine).ok_or_else(|| {
                Error::Config(format!("Unsupported browser engine '{}'", config.engine))
            })?;
            let user_data_dir = config
                .user_data_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| paths.browser_profile(engine.name()));
            Self::launch(engine, config.headed, &user_data_dir).await
        } else {
            Self::attach(&config.host, config.debug_port).await
        }
    }

    /// Attach to a browser started with `--remote-debugging-port`.
    pub async fn attach(host: &str, port: u16) -> Result<Self> {
        let ws_url = browser_ws_url(host, port).await?;
        let cdp = Arc::new(CdpClient::connect(&ws_url).await.map_err(Error::Browser)?);
        info!(host = host, port = port, "Attached to browser");
        Ok(Self {
            engine: None,
            debug_port: port,
            cdp,
            user_data_dir: None,
            process: None,
        })
    }

    /// Launch a browser with its own profile and connect to it.
    pub async fn launch(engine: BrowserEngine, headed: bool, user_data_dir: &Path) -> Result<Self> {
        let browser_path = find_browser_binary(engine)
            .ok_or_else(|| Error::Browser(format!("{} not found. Please install it.", engine.name())))?;

        std::fs::create_dir_all(user_data_dir)?;
        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, user_data_dir, headed);

        info!(
            port = debug_port,
            headed = headed,
            browser = engine.name(),
            profile = %user_data_dir.display(),
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch {}: {}", engine.name(), e)))?;

        let ws_url = wait_for_cdp_ready("127.0.0.1", debug_port, Duration::from_secs(15)).await?;
        let cdp = Arc::new(CdpClient::connect(&ws_url).await.map_err(Error::Browser)?);

        Ok(Self {
            engine: Some(engine),
            debug_port,
            cdp,
            user_data_dir: Some(user_data_dir.to_path_buf()),
            process: Some(child),
        })
    }

    pub fn launched(&self) -> bool {
        self.process.is_some()
    }

    pub fn tab_host(&self) -> CdpTabHost {
        CdpTabHost::new(self.cdp.clone())
    }

    /// Close a launched browser. An attached browser is left running.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.process.take() {
            if let Err(e) = self.cdp.close_browser().await {
                debug!(error = %e, "CDP Browser.close failed (may already be closed)");
            }
            let _ = child.kill().await;
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, headed: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates: Vec<&str> = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"]
            } else if cfg!(target_os = "linux") {
                vec!["google-chrome", "google-chrome-stable", "/usr/bin/google-chrome"]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Chromium => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Chromium.app/Contents/MacOS/Chromium"]
            } else {
                vec!["chromium", "chromium-browser", "/usr/bin/chromium"]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub fn version_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/json/version", host, port)
}

fn ws_url_from_version(body: &Value) -> Option<String> {
    body.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Ask a running browser for its browser-level WebSocket endpoint.
pub async fn browser_ws_url(host: &str, port: u16) -> Result<String> {
    let url = version_url(host, port);
    let body: Value = reqwest::get(&url)
        .await
        .map_err(|e| Error::Browser(format!("No browser listening on {}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| Error::Browser(format!("Bad response from {}: {}", url, e)))?;
    ws_url_from_version(&body)
        .ok_or_else(|| Error::Browser(format!("{} has no webSocketDebuggerUrl", url)))
}

/// Poll `/json/version` until the freshly launched browser answers.
async fn wait_for_cdp_ready(host: &str, port: u16, timeout: Duration) -> Result<String> {
    let start = Instant::now();
    let url = version_url(host, port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = ws_url_from_version(&body) {
                    return Ok(ws_url);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_parse() {
        assert_eq!(BrowserEngine::parse("Chrome"), Some(BrowserEngine::Chrome));
        assert_eq!(BrowserEngine::parse("msedge"), Some(BrowserEngine::Edge));
        assert_eq!(BrowserEngine::parse("chromium"), Some(BrowserEngine::Chromium));
        assert_eq!(BrowserEngine::parse("firefox"), None);
    }

    #[test]
    fn test_headless_flag() {
        let dir = Path::new("/tmp/profile");
        let headed = build_browser_args(9333, dir, true);
        assert!(headed.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(headed.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
        assert!(build_browser_args(9333, dir, false).contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_ws_url_from_version() {
        let body = json!({
            "Browser": "Chrome/120.0",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
        });
        assert_eq!(
            ws_url_from_version(&body).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );
        assert_eq!(ws_url_from_version(&json!({})), None);
        assert_eq!(version_url("localhost", 9222), "http://localhost:9222/json/version");
    }

    #[tokio::test]
    async fn test_attach_without_browser_fails() {
        let port = find_free_port().await.unwrap();
        let err = BrowserSession::attach("127.0.0.1", port).await.err().unwrap();
        assert!(matches!(err, Error::Browser(_)));
    }
}
