use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tabsentinel_core::{SettingsStore, TabHost};
use tabsentinel_scheduler::{SuspensionScheduler, TabVerdict};

use super::support::{connect_browser, load_config, settings_store};

/// Dry run against the live browser. Nothing is frozen.
pub async fn run(json: bool) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let settings: Arc<dyn SettingsStore> = settings_store(&paths);
    let mut session = connect_browser(&config, &paths).await?;
    let host: Arc<dyn TabHost> = Arc::new(session.tab_host());

    let scheduler = SuspensionScheduler::new(host, settings)
        .with_interval(Duration::from_secs(config.suspender.sweep_interval_secs));
    let policy = scheduler.current_policy().await?;
    let rows = scheduler.explain().await?;
    session.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "Suspension {} · delay {} min · {} excluded host(s)",
        if policy.enabled { "enabled" } else { "disabled" },
        policy.suspend_after_ms / 60_000,
        policy.excluded_hosts.len()
    );
    println!();
    print!("{}", render_table(&rows));
    Ok(())
}

fn format_idle(idle_ms: Option<i64>) -> String {
    match idle_ms {
        None => "?".to_string(),
        Some(ms) if ms < 60_000 => format!("{}s", ms / 1000),
        Some(ms) if ms < 3_600_000 => format!("{}m", ms / 60_000),
        Some(ms) => format!("{}h{:02}m", ms / 3_600_000, (ms % 3_600_000) / 60_000),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn render_table(rows: &[TabVerdict]) -> String {
    if rows.is_empty() {
        return "No open tabs.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "  {:<10} {:<7} {:<42} {}", "TAB", "IDLE", "URL", "VERDICT");
    for row in rows {
        let mark = if row.verdict.is_suspend() { "💤" } else { "  " };
        let _ = writeln!(
            out,
            "{}{:<10} {:<7} {:<42} {}",
            mark,
            truncate(row.id.as_str(), 10),
            format_idle(row.idle_ms),
            truncate(&row.url, 42),
            row.verdict.reason()
        );
    }
    let due = rows.iter().filter(|r| r.verdict.is_suspend()).count();
    let _ = writeln!(out);
    let _ = writeln!(out, "{} of {} tab(s) would be suspended", due, rows.len());
    out
}
