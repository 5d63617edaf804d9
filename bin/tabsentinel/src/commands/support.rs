use std::sync::Arc;
use tabsentinel_browser::BrowserSession;
use tabsentinel_core::{Config, JsonFileSettings, Paths, TabHost, TabSnapshot};
use url::Url;

pub fn load_config() -> anyhow::Result<(Paths, Config)> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    Ok((paths, config))
}

pub fn settings_store(paths: &Paths) -> Arc<JsonFileSettings> {
    Arc::new(JsonFileSettings::new(paths.settings_file()))
}

pub async fn connect_browser(config: &Config, paths: &Paths) -> anyhow::Result<BrowserSession> {
    BrowserSession::connect(&config.browser, paths).await.map_err(|e| {
        anyhow::anyhow!(
            "{}\nStart the browser with --remote-debugging-port={} or set browser.launch = true.",
            e,
            config.browser.debug_port
        )
    })
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Tabs currently in front of their window.
pub async fn active_tabs(host: &dyn TabHost) -> tabsentinel_core::Result<Vec<TabSnapshot>> {
    let (tabs, active) = tokio::try_join!(host.list_tabs(), host.active_tab_ids())?;
    Ok(tabs
        .into_iter()
        .filter(|t| t.is_active || active.contains(&t.id))
        .collect())
}

/// Hosts of the tabs currently in front. Used as the first-party set when
/// classifying cookies.
pub async fn active_hosts(host: &dyn TabHost) -> tabsentinel_core::Result<Vec<String>> {
    let mut hosts: Vec<String> = active_tabs(host)
        .await?
        .iter()
        .filter_map(|t| host_of(&t.url))
        .collect();
    hosts.sort();
    hosts.dedup();
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsentinel_core::{MemoryPage, MemoryTabHost};

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://Docs.Example.com/a?b").as_deref(), Some("docs.example.com"));
        assert_eq!(host_of("about:blank"), None);
        assert_eq!(host_of("nonsense"), None);
    }

    #[tokio::test]
    async fn test_active_hosts() {
        let host = MemoryTabHost::new();
        host.insert("a", MemoryPage::new("https://a.example/x", "A").active());
        host.insert("b", MemoryPage::new("https://b.example", "B"));
        host.insert("c", MemoryPage::new("https://a.example/y", "A2").active());
        assert_eq!(active_hosts(&host).await.unwrap(), vec!["a.example"]);
    }
}
