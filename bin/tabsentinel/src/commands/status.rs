use serde_json::Value;
use std::time::Duration;
use tabsentinel_core::{Config, Paths, Policy};

use super::support::settings_store;

async fn daemon_status(config: &Config) -> Option<Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let mut request = client.get(format!("{}/v1/status", config.gateway.base_url()));
    if let Some(token) = config.gateway.api_token() {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json().await.ok()
}

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("tabsentinel status");
    println!("==================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (defaults)" }
    );
    let settings_path = paths.settings_file();
    println!(
        "Settings:  {} {}",
        settings_path.display(),
        if settings_path.exists() { "✓" } else { "✗ (defaults)" }
    );

    let config = if config_exists {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    println!();
    println!(
        "Browser:   {} on {}:{}",
        if config.browser.launch {
            format!("launch {}", config.browser.engine)
        } else {
            "attach".to_string()
        },
        config.browser.host,
        config.browser.debug_port
    );
    println!("Sweep:     every {}s", config.suspender.sweep_interval_secs);
    println!(
        "Gateway:   {} {}",
        config.gateway.base_url(),
        if config.gateway.api_token().is_some() { "(token set)" } else { "(no token)" }
    );

    let settings = settings_store(&paths);
    let policy = Policy::load(settings.as_ref()).await?;
    println!();
    println!(
        "Suspension: {}",
        if policy.enabled { "✓ enabled" } else { "✗ disabled" }
    );
    println!("Delay:      {} min", policy.suspend_after_ms / 60_000);
    if policy.excluded_hosts.is_empty() {
        println!("Excluded:   (none)");
    } else {
        println!("Excluded:");
        for host in &policy.excluded_hosts {
            println!("  {}", host);
        }
    }

    println!();
    match daemon_status(&config).await {
        Some(status) => {
            let running = status.get("running").and_then(|v| v.as_bool()).unwrap_or(false);
            let suspended = status
                .get("suspended")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            println!("Daemon:     ✓ reachable");
            println!(
                "Timer:      {}",
                if running { "✓ running" } else { "✗ stopped" }
            );
            println!("Suspended:  {} tab(s)", suspended);
        }
        None => {
            println!("Daemon:     ✗ not reachable");
            println!();
            println!("Run `tabsentinel run` to start it.");
        }
    }

    Ok(())
}
