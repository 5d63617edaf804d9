pub mod cookies;
pub mod popup_blocker;

pub use cookies::{
    classify_cookies, domain_matches, embedded_hosts, CookieCounts, CookieGroup, CookieKind, CookieReport, Whitelist,
};
pub use popup_blocker::{PopupBlocker, ScrubReport, SELECTORS};
