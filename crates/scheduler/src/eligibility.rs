//! Per-tab suspension decision.
//!
//! Checks run in a fixed order and the first failing check names the
//! verdict, so a tab that is both active and excluded always reports
//! `SkipActive`. The `enabled` flag is not consulted here: a disabled
//! policy short-circuits the whole sweep in the scheduler.

use serde::Serialize;
pub use tabsentinel_core::tab::UNKNOWN_IDLE_FALLBACK_MS;
use tabsentinel_core::{Policy, TabSnapshot};
use url::Url;

use crate::state::SuspendedSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Suspend,
    SkipActive,
    SkipExcludedScheme,
    SkipExcludedHost,
    SkipAlreadySuspended,
    SkipTooRecent,
    SkipInvalidUrl,
}

impl Verdict {
    pub fn is_suspend(self) -> bool {
        self == Self::Suspend
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Suspend => "idle past the suspend delay",
            Self::SkipActive => "active tab",
            Self::SkipExcludedScheme => "scheme or file type cannot be suspended",
            Self::SkipExcludedHost => "host is excluded",
            Self::SkipAlreadySuspended => "already suspended",
            Self::SkipTooRecent => "used recently",
            Self::SkipInvalidUrl => "URL does not parse",
        }
    }
}

pub fn decide(tab: &TabSnapshot, policy: &Policy, now_ms: i64, suspended: &SuspendedSet) -> Verdict {
    let verdict = decide_immediate(tab, policy, suspended);
    if !verdict.is_suspend() {
        return verdict;
    }

    let last_accessed = tab
        .last_accessed
        .unwrap_or(now_ms - UNKNOWN_IDLE_FALLBACK_MS);
    let idle_ms = now_ms.saturating_sub(last_accessed);
    let threshold = i64::try_from(policy.suspend_after_ms).unwrap_or(i64::MAX);
    if idle_ms <= threshold {
        return Verdict::SkipTooRecent;
    }
    Verdict::Suspend
}

/// Every check except idle time. Used by freeze-all.
pub fn decide_immediate(tab: &TabSnapshot, policy: &Policy, suspended: &SuspendedSet) -> Verdict {
    let url = match Url::parse(&tab.url) {
        Ok(url) => url,
        Err(_) => return Verdict::SkipInvalidUrl,
    };

    if !policy.is_scheme_allowed(url.scheme()) || is_pdf(&url) {
        return Verdict::SkipExcludedScheme;
    }

    if tab.is_active {
        return Verdict::SkipActive;
    }

    if url
        .host_str()
        .map(|host| policy.is_host_excluded(host))
        .unwrap_or(false)
    {
        return Verdict::SkipExcludedHost;
    }

    if suspended.contains(&tab.id) {
        return Verdict::SkipAlreadySuspended;
    }

    Verdict::Suspend
}

// PDFs render through the viewer plugin and rarely come back cleanly after a reload.
fn is_pdf(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsentinel_core::TabId;

    const NOW: i64 = 1_700_000_000_000;
    const FIVE_MIN: u64 = 300_000;

    fn policy() -> Policy {
        Policy::default().with_suspend_after_ms(FIVE_MIN)
    }

    fn idle_tab(url: &str) -> TabSnapshot {
        TabSnapshot::new("tab-1", url, "Page").last_accessed(NOW - 600_000)
    }

    #[test]
    fn test_idle_https_tab_is_suspended() {
        let tab = idle_tab("https://example.org/article");
        assert_eq!(decide(&tab, &policy(), NOW, &SuspendedSet::new()), Verdict::Suspend);
    }

    #[test]
    fn test_browser_internal_page_is_excluded_scheme() {
        let tab = idle_tab("chrome://settings");
        assert_eq!(
            decide(&tab, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedScheme
        );
        for url in [
            "chrome-extension://abcdef/popup.html",
            "edge://flags",
            "about:blank",
            "file:///home/me/notes.txt",
            "ftp://mirror.example.org/",
            "data:text/html,hi",
        ] {
            assert_eq!(
                decide(&idle_tab(url), &policy(), NOW, &SuspendedSet::new()),
                Verdict::SkipExcludedScheme,
                "{url}"
            );
        }
    }

    #[test]
    fn test_pdf_is_excluded_scheme() {
        let tab = idle_tab("https://example.org/papers/Report.PDF");
        assert_eq!(
            decide(&tab, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedScheme
        );
        // Only the path counts; a query mentioning .pdf does not.
        let tab = idle_tab("https://example.org/view?file=a.pdf");
        assert_eq!(decide(&tab, &policy(), NOW, &SuspendedSet::new()), Verdict::Suspend);
    }

    #[test]
    fn test_excluded_host_wins_regardless_of_idle_time() {
        let policy = policy().with_excluded_hosts(["example.com"]);
        let tab = TabSnapshot::new("tab-1", "https://example.com/page", "Page")
            .last_accessed(NOW - 3_600_000);
        assert_eq!(
            decide(&tab, &policy, NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedHost
        );
        let tab = TabSnapshot::new("tab-1", "https://EXAMPLE.com./page", "Page");
        assert_eq!(
            decide(&tab, &policy, NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedHost
        );
    }

    #[test]
    fn test_excluded_entries_are_dot_normalized() {
        let policy = policy().with_excluded_hosts([".Example.com"]);
        let tab = idle_tab("https://example.com/");
        assert_eq!(
            decide(&tab, &policy, NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedHost
        );
    }

    #[test]
    fn test_active_tab_is_never_suspended() {
        for idle in [0, 600_000, 86_400_000] {
            let tab = TabSnapshot::new("tab-1", "https://example.org", "Page")
                .active()
                .last_accessed(NOW - idle);
            let verdict = decide(&tab, &policy(), NOW, &SuspendedSet::new());
            assert_eq!(verdict, Verdict::SkipActive);
            assert_ne!(
                decide_immediate(&tab, &policy(), &SuspendedSet::new()),
                Verdict::Suspend
            );
        }
    }

    #[test]
    fn test_scheme_check_precedes_active_check() {
        let tab = TabSnapshot::new("tab-1", "chrome://newtab", "New Tab").active();
        assert_eq!(
            decide(&tab, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipExcludedScheme
        );
    }

    #[test]
    fn test_already_suspended_is_not_retargeted() {
        let mut suspended = SuspendedSet::new();
        suspended.claim(TabId::from("tab-1"), NOW);
        let tab = idle_tab("https://example.org");
        assert_eq!(decide(&tab, &policy(), NOW, &suspended), Verdict::SkipAlreadySuspended);
        assert_eq!(
            decide_immediate(&tab, &policy(), &suspended),
            Verdict::SkipAlreadySuspended
        );
    }

    #[test]
    fn test_unknown_last_access_counts_as_ten_minutes() {
        let tab = TabSnapshot::new("tab-1", "https://example.org", "Page");
        assert_eq!(decide(&tab, &policy(), NOW, &SuspendedSet::new()), Verdict::Suspend);

        let strict = Policy::default().with_suspend_after_ms(600_000);
        assert_eq!(
            decide(&tab, &strict, NOW, &SuspendedSet::new()),
            Verdict::SkipTooRecent
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let at_threshold = TabSnapshot::new("tab-1", "https://example.org", "Page")
            .last_accessed(NOW - FIVE_MIN as i64);
        assert_eq!(
            decide(&at_threshold, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipTooRecent
        );
        let past = at_threshold.clone().last_accessed(NOW - FIVE_MIN as i64 - 1);
        assert_eq!(decide(&past, &policy(), NOW, &SuspendedSet::new()), Verdict::Suspend);
    }

    #[test]
    fn test_future_last_access_is_too_recent() {
        let tab = TabSnapshot::new("tab-1", "https://example.org", "Page").last_accessed(NOW + 5_000);
        assert_eq!(
            decide(&tab, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipTooRecent
        );
    }

    #[test]
    fn test_unparseable_url() {
        for url in ["", "not a url", "https://"] {
            let tab = idle_tab(url);
            assert_eq!(
                decide(&tab, &policy(), NOW, &SuspendedSet::new()),
                Verdict::SkipInvalidUrl,
                "{url:?}"
            );
        }
    }

    #[test]
    fn test_immediate_ignores_idle_time() {
        let tab = TabSnapshot::new("tab-1", "https://example.org", "Page").last_accessed(NOW);
        assert_eq!(
            decide_immediate(&tab, &policy(), &SuspendedSet::new()),
            Verdict::Suspend
        );
        assert_eq!(
            decide(&tab, &policy(), NOW, &SuspendedSet::new()),
            Verdict::SkipTooRecent
        );
    }
}
