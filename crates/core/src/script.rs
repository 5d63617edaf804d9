//! Scripts evaluated inside a tab's page context.
//!
//! Hosts receive a [`PageScript`] rather than raw source so that a host
//! without a JavaScript engine (the in-memory host) can apply the same
//! semantics directly.

/// Element id of the placeholder. The freeze script checks for it before
/// doing anything, which makes repeated injection a no-op.
pub const SUSPEND_OVERLAY_ID: &str = "suspend-overlay";

pub const SLEEP_GLYPH: &str = "💤";

pub const REACTIVATE_HINT: &str = "Click to reactivate";

/// Used when no icon is configured: a moon glyph rendered as an inline SVG.
pub const DEFAULT_ICON_URL: &str = "data:image/svg+xml;utf8,<svg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 64 64'><circle cx='32' cy='32' r='30' fill='%23222'/><path d='M40 14a20 20 0 1 0 10 34A16 16 0 0 1 40 14z' fill='%23ffd75e'/></svg>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScript {
    /// No-op used to learn whether the browser allows injection into the tab.
    Probe,
    /// Replace the page with the placeholder overlay.
    Freeze { icon_url: String },
    /// Reload the page if, and only if, it is showing the overlay.
    Unfreeze,
    /// Remove visible elements matching any selector; evaluates to the count.
    ScrubPopups { selectors: Vec<String> },
    /// True while the overlay is in the page. Page scripts may rewrite the
    /// title of a frozen tab, so only this tells a reload apart.
    IsFrozen,
    /// Hostnames other than the page's own that the page loads or links to.
    EmbeddedHosts,
}

impl PageScript {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Freeze { .. } => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::ScrubPopups { .. } => "scrub_popups",
            Self::IsFrozen => "is_frozen",
            Self::EmbeddedHosts => "embedded_hosts",
        }
    }

    /// JavaScript expression for hosts that evaluate source.
    pub fn source(&self) -> String {
        match self {
            Self::Probe => "true".to_string(),
            Self::Freeze { icon_url } => FREEZE_TEMPLATE
                .replace("__OVERLAY_ID__", &js_string(SUSPEND_OVERLAY_ID))
                .replace("__GLYPH__", &js_string(SLEEP_GLYPH))
                .replace("__HINT__", &js_string(REACTIVATE_HINT))
                .replace("__ICON_URL__", &js_string(icon_url)),
            Self::Unfreeze => {
                UNFREEZE_TEMPLATE.replace("__OVERLAY_ID__", &js_string(SUSPEND_OVERLAY_ID))
            }
            Self::ScrubPopups { selectors } => SCRUB_TEMPLATE
                .replace("__OVERLAY_ID__", &js_string(SUSPEND_OVERLAY_ID))
                .replace("__SELECTORS__", &js_string(&selectors.join(","))),
            Self::IsFrozen => format!(
                "document.getElementById({}) !== null",
                js_string(SUSPEND_OVERLAY_ID)
            ),
            Self::EmbeddedHosts => EMBEDDED_HOSTS_TEMPLATE.to_string(),
        }
    }
}

/// Title the freeze script leaves behind: the glyph is added once and never stacked.
pub fn sleep_title(title: &str) -> String {
    if title.contains(SLEEP_GLYPH) {
        title.to_string()
    } else {
        format!("{} {}", SLEEP_GLYPH, title.trim())
    }
}

pub fn is_sleeping_title(title: &str) -> bool {
    title.contains(SLEEP_GLYPH)
}

fn js_string(s: &str) -> String {
    // A JSON string literal is a valid JS string literal; escape `</` for inline contexts.
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

const FREEZE_TEMPLATE: &str = r#"(() => {
  const overlayId = __OVERLAY_ID__;
  if (document.getElementById(overlayId)) return false;
  const glyph = __GLYPH__;
  const overlay = document.createElement("div");
  overlay.id = overlayId;
  overlay.style.cssText = "position:fixed;top:0;left:0;width:100%;height:100%;background:rgba(0,0,0,0.8);display:flex;align-items:center;justify-content:center;flex-direction:column;font-family:Arial,sans-serif;text-align:center;color:white;cursor:pointer;z-index:2147483647;";
  const logo = document.createElement("img");
  logo.alt = "TabSentinel";
  logo.src = __ICON_URL__;
  logo.style.cssText = "width:240px;height:auto;margin-bottom:20px;";
  const hint = document.createElement("p");
  hint.textContent = __HINT__;
  overlay.appendChild(logo);
  overlay.appendChild(hint);
  document.body.innerHTML = "";
  document.body.appendChild(overlay);
  if (!document.title.includes(glyph)) {
    document.title = glyph + " " + document.title.trim();
  }
  overlay.addEventListener("click", () => window.location.reload());
  return true;
})()"#;

const UNFREEZE_TEMPLATE: &str = r#"(() => {
  if (!document.getElementById(__OVERLAY_ID__)) return false;
  setTimeout(() => window.location.reload(), 0);
  return true;
})()"#;

const SCRUB_TEMPLATE: &str = r##"(() => {
  if (!document.body) return 0;
  const overlayId = __OVERLAY_ID__;
  let removed = 0;
  document.querySelectorAll(__SELECTORS__).forEach((el) => {
    if (el === document.body || el === document.documentElement) return;
    if (el.id === overlayId || el.closest("#" + overlayId) || el.querySelector("#" + overlayId)) return;
    if (el.offsetWidth > 0 && el.offsetHeight > 0) {
      el.remove();
      removed++;
    }
  });
  return removed;
})()"##;

const EMBEDDED_HOSTS_TEMPLATE: &str = r#"(() => {
  const hosts = new Set();
  const add = (raw, base) => {
    try {
      const url = new URL(raw, base);
      if (url.hostname && url.hostname !== location.hostname) hosts.add(url.hostname.toLowerCase());
    } catch (_) {}
  };
  ["src", "href", "action"].forEach((attr) => {
    document.querySelectorAll("[" + attr + "]").forEach((el) => add(el.getAttribute(attr), document.baseURI));
  });
  if (performance.getEntriesByType) {
    performance.getEntriesByType("resource").forEach((entry) => add(entry.name));
  }
  return Array.from(hosts).sort();
})()"#;
