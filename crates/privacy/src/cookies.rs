//! Cookie grouping and classification.
//!
//! Cookies are grouped by `name@domain` (domain as reported, so `.a.com`
//! and `a.com` stay separate) and each group gets one [`CookieKind`]. The
//! rules are heuristic lists, checked in a fixed order.

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tabsentinel_core::settings::{keys, SettingsStore};
use tabsentinel_core::{PageScript, RawCookie, Result, TabHost, TabId};

/// Login, payment and collaboration services. Suffix match.
pub const ESSENTIAL_DOMAINS: &[&str] = &[
    "paypal.com", "stripe.com", "visa.com", "mastercard.com", "americanexpress.com",
    "microsoft.com", "live.com", "outlook.com", "azure.com",
    "google.com", "accounts.google.com", "apple.com", "icloud.com", "amazon.com",
    "slack.com", "zoom.us", "skype.com", "webex.com",
    "asana.com", "trello.com", "notion.so", "evernote.com",
    "github.com", "gitlab.com", "stackoverflow.com", "chat.openai.com", "coursera.org",
    "mail.yandex.ru", "passport.yandex.ru", "auth.yandex.ru",
];

pub const ESSENTIAL_SUBDOMAIN_PREFIXES: &[&str] = &["mail.", "auth.", "passport."];

/// Tracking and analytics vendors. Exact or subdomain match.
pub const ANALYTICS_DOMAINS: &[&str] = &[
    "google-analytics.com", "googletagmanager.com", "doubleclick.net", "facebook.net",
    "mixpanel.com", "segment.io", "hotjar.com", "amplitude.com", "clarity.ms",
    "matomo.org", "piwik.pro", "adobe.com", "omniture.com", "snowplowanalytics.com",
    "heap.io", "kissmetrics.com", "crazyegg.com", "quantserve.com", "statcounter.com",
    "clicky.com", "chartbeat.com", "newrelic.com", "optimizely.com", "fullstory.com",
    "analytics.yahoo.com",
    "metrika.yandex.ru", "mc.yandex.ru", "yastatic.net", "cdn.metrika.yandex.ru",
    "openstat.net", "spylog.com", "liveinternet.ru", "top.mail.ru", "rambler.ru",
    "baidu.com", "cnzz.com", "umeng.com",
    "atinternet.com",
    "etracker.com",
    "userlocal.jp",
    "clicky.com.br",
    "tataconsumer.com",
    "naver.com",
    "gemius.com.tr",
];

/// Substrings of cookie names typical of adtech.
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "track", "trk", "ad", "ads", "pixel", "bid", "stat", "analytics", "click", "impression",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieKind {
    Essential,
    Analytics,
    Suspicious,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieGroup {
    pub name: String,
    /// Leading dot stripped, lowercased.
    pub domain: String,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: CookieKind,
    pub path_list: Vec<String>,
    pub whitelisted: bool,
}

/// User-approved cookie domains (`cookieWhitelist` setting).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Whitelist(BTreeSet<String>);

impl Whitelist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            domains
                .into_iter()
                .filter_map(|d| normalize_entry(d.as_ref()))
                .collect(),
        )
    }

    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        Ok(Self::new(store.get_string_list(keys::COOKIE_WHITELIST).await?))
    }

    pub async fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        store
            .set(keys::COOKIE_WHITELIST, json!(self.domains().collect::<Vec<_>>()))
            .await
    }

    pub fn contains(&self, domain: &str) -> bool {
        normalize_entry(domain).is_some_and(|d| self.0.contains(&d))
    }

    /// Returns false for a blank domain or one already listed.
    pub fn insert(&mut self, domain: &str) -> bool {
        normalize_entry(domain).is_some_and(|d| self.0.insert(d))
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        normalize_entry(domain).is_some_and(|d| self.0.remove(&d))
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CookieCounts {
    pub essential: usize,
    pub analytics: usize,
    pub suspicious: usize,
    /// Whitelisted groups are counted here instead of under their kind.
    pub whitelist: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CookieReport {
    pub groups: Vec<CookieGroup>,
    pub counts: CookieCounts,
}

impl CookieReport {
    pub fn build(cookies: &[RawCookie], first_party_hosts: &[String], whitelist: &Whitelist) -> Self {
        let groups = classify_cookies(cookies, first_party_hosts, whitelist);
        let mut counts = CookieCounts::default();
        for group in &groups {
            match (group.whitelisted, group.kind) {
                (true, _) => counts.whitelist += 1,
                (false, CookieKind::Essential) => counts.essential += 1,
                (false, CookieKind::Analytics) => counts.analytics += 1,
                (false, CookieKind::Suspicious) => counts.suspicious += 1,
            }
        }
        Self { groups, counts }
    }

    /// Groups whose domain belongs to `host`, for a per-tab view.
    pub fn for_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a CookieGroup> {
        self.groups.iter().filter(move |g| domain_matches(&g.domain, host))
    }

    /// Third-party groups of a tab on `host`: cookies of hosts the page
    /// embeds, or their parent domains.
    pub fn embedded_in<'a>(
        &'a self,
        host: &'a str,
        embedded: &'a [String],
    ) -> impl Iterator<Item = &'a CookieGroup> {
        self.groups.iter().filter(move |g| {
            !domain_matches(&g.domain, host)
                && embedded.iter().any(|e| {
                    let e = e.to_lowercase();
                    g.domain == e || g.domain.ends_with(&format!(".{}", e))
                })
        })
    }
}

/// Hosts that the page in `tab` loads resources from or links to, other
/// than its own. Sorted and deduplicated.
pub async fn embedded_hosts(host: &dyn TabHost, tab: &TabId) -> Result<Vec<String>> {
    let value = host.run_script(tab, &PageScript::EmbeddedHosts).await?;
    let mut hosts: Vec<String> = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect()
        })
        .unwrap_or_default();
    hosts.sort();
    hosts.dedup();
    Ok(hosts)
}

/// Group and classify in first-seen order.
pub fn classify_cookies(
    cookies: &[RawCookie],
    first_party_hosts: &[String],
    whitelist: &Whitelist,
) -> Vec<CookieGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<CookieGroup> = Vec::new();

    for cookie in cookies {
        let key = format!("{}@{}", cookie.name, cookie.domain);
        match index.get(&key) {
            Some(&i) => {
                groups[i].count += 1;
                groups[i].path_list.push(cookie.path.clone());
            }
            None => {
                index.insert(key, groups.len());
                let domain = normalize_domain(&cookie.domain);
                groups.push(CookieGroup {
                    name: cookie.name.clone(),
                    kind: classify(&domain, &cookie.name, first_party_hosts),
                    whitelisted: whitelist.contains(&domain),
                    domain,
                    count: 1,
                    path_list: vec![cookie.path.clone()],
                });
            }
        }
    }
    groups
}

fn classify(domain: &str, name: &str, first_party_hosts: &[String]) -> CookieKind {
    let name = name.to_lowercase();

    if ESSENTIAL_SUBDOMAIN_PREFIXES.iter().any(|p| domain.starts_with(p)) {
        return CookieKind::Essential;
    }
    if ESSENTIAL_DOMAINS.iter().any(|d| domain.ends_with(d)) {
        return CookieKind::Essential;
    }
    if ANALYTICS_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
    {
        return CookieKind::Analytics;
    }
    if SUSPICIOUS_KEYWORDS.iter().any(|k| name.contains(k)) {
        return CookieKind::Suspicious;
    }
    let first_party = first_party_hosts
        .iter()
        .any(|host| domain.ends_with(&host.to_lowercase()));
    if !first_party {
        return CookieKind::Suspicious;
    }
    CookieKind::Essential
}

fn normalize_entry(domain: &str) -> Option<String> {
    let d = domain.trim().trim_start_matches('.').to_lowercase();
    (!d.is_empty()).then_some(d)
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_lowercase()
}

/// True if a cookie set for `cookie_domain` is visible on `page_host`, or
/// was set by one of its subdomains.
pub fn domain_matches(cookie_domain: &str, page_host: &str) -> bool {
    let clean = normalize_domain(cookie_domain);
    let host = page_host.to_lowercase();
    clean == host
        || host.ends_with(&format!(".{}", clean))
        || clean.ends_with(&format!(".{}", host))
}
