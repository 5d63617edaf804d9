//! The options surface: everything the daemon reads from the settings store
//! is written from here.

use serde_json::{json, Value};
use std::time::Duration;
use tabsentinel_core::policy::{normalize_host, suspend_minutes_to_ms, DEFAULT_EXCLUDED_SITES};
use tabsentinel_core::settings::keys;
use tabsentinel_core::{Command, Config, Policy, SettingsStore};
use tabsentinel_privacy::Whitelist;

use super::send::post_command;
use super::support::{load_config, settings_store};

pub async fn set_enabled(store: &dyn SettingsStore, enabled: bool) -> anyhow::Result<()> {
    store.set(keys::EXTENSION_ENABLED, json!(enabled)).await?;
    Ok(())
}

pub async fn set_delay(store: &dyn SettingsStore, minutes: u64) -> anyhow::Result<u64> {
    let ms = suspend_minutes_to_ms(minutes).map_err(|e| anyhow::anyhow!(e))?;
    store.set(keys::SUSPEND_TIME, json!(ms)).await?;
    Ok(ms)
}

/// Returns false when the host was already excluded.
pub async fn add_excluded(store: &dyn SettingsStore, raw: &str) -> anyhow::Result<bool> {
    let host = normalize_host(raw).ok_or_else(|| anyhow::anyhow!("'{}' is not a host", raw))?;
    let mut sites = store.get_string_list(keys::EXCLUDED_SITES).await?;
    if sites.iter().any(|s| normalize_host(s).as_deref() == Some(host.as_str())) {
        return Ok(false);
    }
    sites.push(host);
    store.set(keys::EXCLUDED_SITES, json!(sites)).await?;
    Ok(true)
}

/// Returns false when the host was not in the list.
pub async fn remove_excluded(store: &dyn SettingsStore, raw: &str) -> anyhow::Result<bool> {
    let host = normalize_host(raw).ok_or_else(|| anyhow::anyhow!("'{}' is not a host", raw))?;
    let sites = store.get_string_list(keys::EXCLUDED_SITES).await?;
    let before = sites.len();
    let kept: Vec<String> = sites
        .into_iter()
        .filter(|s| normalize_host(s).as_deref() != Some(host.as_str()))
        .collect();
    if kept.len() == before {
        return Ok(false);
    }
    store.set(keys::EXCLUDED_SITES, json!(kept)).await?;
    Ok(true)
}

/// Merge the recommended exclusions into the list. Returns how many were new.
pub async fn add_recommended(store: &dyn SettingsStore) -> anyhow::Result<usize> {
    let mut added = 0;
    for site in DEFAULT_EXCLUDED_SITES {
        if add_excluded(store, site).await? {
            added += 1;
        }
    }
    Ok(added)
}

/// Returns false when the domain was already whitelisted.
pub async fn add_whitelisted(store: &dyn SettingsStore, domain: &str) -> anyhow::Result<bool> {
    if domain.trim().trim_start_matches('.').is_empty() {
        anyhow::bail!("'{}' is not a domain", domain);
    }
    let mut whitelist = Whitelist::load(store).await?;
    if !whitelist.insert(domain) {
        return Ok(false);
    }
    whitelist.save(store).await?;
    Ok(true)
}

/// Returns false when the domain was not whitelisted.
pub async fn remove_whitelisted(store: &dyn SettingsStore, domain: &str) -> anyhow::Result<bool> {
    let mut whitelist = Whitelist::load(store).await?;
    if !whitelist.remove(domain) {
        return Ok(false);
    }
    whitelist.save(store).await?;
    Ok(true)
}

pub async fn clear_all(store: &dyn SettingsStore) -> anyhow::Result<usize> {
    let keys: Vec<String> = store.all().await?.keys().cloned().collect();
    for key in &keys {
        store.remove(key).await?;
    }
    Ok(keys.len())
}

/// Tell a running daemon about an enable/disable. A missing daemon is not an error.
async fn notify_daemon(config: &Config, command: Command) {
    match post_command(config, &command, Duration::from_secs(30)).await {
        Ok(reply) => println!("  daemon: {}", reply),
        Err(e) => println!("  daemon not notified ({})", e),
    }
}

pub async fn show() -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    let store = settings_store(&paths);
    let all = store.all().await?;
    let policy = Policy::from_settings(&all);

    println!();
    println!("⚙ Settings");
    println!("  File: {}", store.path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&Value::Object(all))?);
    println!();
    println!("Effective: {}", serde_json::to_string_pretty(&policy)?);
    Ok(())
}

pub async fn enable() -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    set_enabled(settings_store(&paths).as_ref(), true).await?;
    println!("✓ Suspension enabled");
    notify_daemon(&config, Command::SuspendEnable).await;
    Ok(())
}

pub async fn disable() -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    set_enabled(settings_store(&paths).as_ref(), false).await?;
    println!("✓ Suspension disabled");
    notify_daemon(&config, Command::SuspendDisable).await;
    Ok(())
}

pub async fn delay(minutes: u64) -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    let ms = set_delay(settings_store(&paths).as_ref(), minutes).await?;
    println!("✓ Tabs are suspended after {} min ({} ms) idle", minutes, ms);
    Ok(())
}

pub async fn exclude(host: &str) -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    if add_excluded(settings_store(&paths).as_ref(), host).await? {
        println!("✓ Excluded {}", host);
    } else {
        println!("{} is already excluded", host);
    }
    Ok(())
}

pub async fn include(host: &str) -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    if remove_excluded(settings_store(&paths).as_ref(), host).await? {
        println!("✓ {} can be suspended again", host);
    } else {
        println!("{} was not excluded", host);
    }
    Ok(())
}

pub async fn recommend() -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    let added = add_recommended(settings_store(&paths).as_ref()).await?;
    println!("✓ Added {} recommended exclusion(s)", added);
    Ok(())
}

pub async fn whitelist_show() -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    let whitelist = Whitelist::load(settings_store(&paths).as_ref()).await?;
    let domains: Vec<&str> = whitelist.domains().collect();
    if domains.is_empty() {
        println!("Cookie whitelist is empty");
    } else {
        println!("Cookie whitelist:");
        for domain in domains {
            println!("  {}", domain);
        }
    }
    Ok(())
}

pub async fn whitelist_add(domain: &str) -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    if add_whitelisted(settings_store(&paths).as_ref(), domain).await? {
        println!("✓ Whitelisted cookies of {}", domain);
    } else {
        println!("{} is already whitelisted", domain);
    }
    Ok(())
}

pub async fn whitelist_remove(domain: &str) -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    if remove_whitelisted(settings_store(&paths).as_ref(), domain).await? {
        println!("✓ Removed {} from the cookie whitelist", domain);
    } else {
        println!("{} was not whitelisted", domain);
    }
    Ok(())
}

pub async fn clear() -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    let removed = clear_all(settings_store(&paths).as_ref()).await?;
    println!("✓ Cleared {} setting(s)", removed);
    Ok(())
}
