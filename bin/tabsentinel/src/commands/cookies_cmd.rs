use std::collections::BTreeSet;
use std::fmt::Write as _;
use tabsentinel_core::TabHost;
use tabsentinel_privacy::{embedded_hosts, CookieGroup, CookieKind, CookieReport, Whitelist};
use tracing::debug;

use super::support::{active_hosts, connect_browser, host_of, load_config, settings_store};

pub async fn run(host_filter: Option<String>) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let settings = settings_store(&paths);
    let mut session = connect_browser(&config, &paths).await?;
    let host = session.tab_host();

    let first_party = match &host_filter {
        Some(h) => vec![h.to_lowercase()],
        None => active_hosts(&host).await?,
    };
    let cookies = host.all_cookies().await?;
    let whitelist = Whitelist::load(settings.as_ref()).await?;
    let embedded = match &host_filter {
        Some(h) => embedded_on_host(&host, h).await?,
        None => Vec::new(),
    };
    session.close().await;

    let report = CookieReport::build(&cookies, &first_party, &whitelist);
    let groups: Vec<&CookieGroup> = match &host_filter {
        Some(h) => report.for_host(h).collect(),
        None => report.groups.iter().collect(),
    };

    println!("🍪 Cookies ({} raw, {} group(s))", cookies.len(), report.groups.len());
    if !first_party.is_empty() {
        println!("First party: {}", first_party.join(", "));
    }
    println!(
        "Essential: {}  Analytics: {}  Suspicious: {}  Whitelisted: {}",
        report.counts.essential,
        report.counts.analytics,
        report.counts.suspicious,
        report.counts.whitelist
    );
    println!();
    print!("{}", render_groups(&groups));

    if let Some(h) = &host_filter {
        let third_party: Vec<&CookieGroup> = report.embedded_in(h, &embedded).collect();
        println!();
        println!("Third-party ({} embedded host(s))", embedded.len());
        print!("{}", render_groups(&third_party));
    }
    Ok(())
}

/// Hosts embedded by any open tab on `page_host`.
async fn embedded_on_host(host: &dyn TabHost, page_host: &str) -> anyhow::Result<Vec<String>> {
    let page_host = page_host.to_lowercase();
    let mut hosts = BTreeSet::new();
    for tab in host.list_tabs().await? {
        if host_of(&tab.url).as_deref() != Some(page_host.as_str()) {
            continue;
        }
        match embedded_hosts(host, &tab.id).await {
            Ok(found) => hosts.extend(found),
            Err(e) => debug!(tab_id = %tab.id, error = %e, "Embedded hosts unavailable"),
        }
    }
    Ok(hosts.into_iter().collect())
}

pub async fn delete(domain: &str, name: Option<&str>) -> anyhow::Result<()> {
    if domain.trim().is_empty() {
        anyhow::bail!("--domain must not be empty");
    }
    let (paths, config) = load_config()?;
    let mut session = connect_browser(&config, &paths).await?;
    let result = session.tab_host().delete_cookies(domain.trim(), name).await;
    session.close().await;

    let deleted = result?;
    match name {
        Some(n) => println!("✓ Deleted {} cookie(s) named {} for {}", deleted, n, domain),
        None => println!("✓ Deleted {} cookie(s) for {}", deleted, domain),
    }
    Ok(())
}

fn kind_label(group: &CookieGroup) -> &'static str {
    if group.whitelisted {
        return "whitelisted";
    }
    match group.kind {
        CookieKind::Essential => "essential",
        CookieKind::Analytics => "analytics",
        CookieKind::Suspicious => "suspicious",
    }
}

fn render_groups(groups: &[&CookieGroup]) -> String {
    if groups.is_empty() {
        return "No cookies.\n".to_string();
    }
    let mut out = String::new();
    for group in groups {
        let _ = writeln!(
            out,
            "  {:<12} {:<32} {:<28} x{}",
            kind_label(group),
            group.domain,
            group.name,
            group.count
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsentinel_core::RawCookie;

    #[test]
    fn test_render_groups_marks_whitelist() {
        let cookies = vec![
            RawCookie::new("_ga", ".google-analytics.com", "/"),
            RawCookie::new("pref", "news.example", "/"),
            RawCookie::new("pref", "news.example", "/world"),
        ];
        let report = CookieReport::build(
            &cookies,
            &["news.example".to_string()],
            &Whitelist::new(["google-analytics.com"]),
        );
        let groups: Vec<&CookieGroup> = report.groups.iter().collect();
        let text = render_groups(&groups);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].trim_start().starts_with("whitelisted"));
        assert!(lines[1].trim_start().starts_with("essential"));
        assert!(lines[1].ends_with("x2"));
        assert_eq!(render_groups(&[]), "No cookies.\n");
    }

    #[tokio::test]
    async fn test_embedded_hosts_come_from_matching_tabs() {
        use tabsentinel_core::{MemoryPage, MemoryTabHost};

        let host = MemoryTabHost::new();
        host.insert("a", MemoryPage::new("https://news.example/1", "One").embeds(&["cdn.example"]));
        host.insert("b", MemoryPage::new("https://News.example/2", "Two").embeds(&["ads.example"]));
        host.insert("c", MemoryPage::new("https://other.example", "Other").embeds(&["pay.example"]));

        assert_eq!(
            embedded_on_host(&host, "news.example").await.unwrap(),
            vec!["ads.example", "cdn.example"]
        );
        assert!(embedded_on_host(&host, "none.example").await.unwrap().is_empty());
    }
}
