use serde_json::Value;
use tabsentinel_core::Config;

use super::support::load_config;

const MASK: &str = "********";

/// Config as JSON with the API token hidden.
fn masked(config: &Config) -> anyhow::Result<Value> {
    let mut json = serde_json::to_value(config)?;
    if config.gateway.api_token().is_some() {
        json["gateway"]["apiToken"] = Value::String(MASK.to_string());
    }
    Ok(json)
}

pub async fn show() -> anyhow::Result<()> {
    let (paths, config) = load_config()?;

    println!();
    println!("📋 Current Configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&masked(&config)?)?);
    Ok(())
}

pub async fn path() -> anyhow::Result<()> {
    let (paths, _) = load_config()?;
    println!("{}", paths.config_file().display());
    Ok(())
}

/// Get a config value by dot-separated key path.
pub async fn get(key: &str) -> anyhow::Result<()> {
    let (_, config) = load_config()?;
    let json = serde_json::to_value(&config)?;

    let value = resolve_json_path(&json, key)
        .ok_or_else(|| anyhow::anyhow!("Key '{}' not found in config", key))?;
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

/// Set a config value by dot-separated key path. The result must still validate.
pub async fn set(key: &str, value: &str) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let mut json = serde_json::to_value(&config)?;

    // Anything that is not valid JSON is taken as a plain string.
    let parsed: Value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    set_json_path(&mut json, key, parsed.clone())?;
    let new_config: Config = serde_json::from_value(json)
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))?;
    new_config.validate()?;
    new_config.save(&paths.config_file())?;

    match parsed {
        Value::String(s) => println!("✓ Set {} = {}", key, s),
        other => println!("✓ Set {} = {}", key, serde_json::to_string(&other)?),
    }
    Ok(())
}

/// Look a segment up as written, then in camelCase.
fn child_key(node: &Value, part: &str) -> Option<String> {
    let camel = to_camel_case(part);
    if node.get(&camel).is_some() {
        Some(camel)
    } else if node.get(part).is_some() {
        Some(part.to_string())
    } else {
        None
    }
}

fn resolve_json_path(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;
    for part in path.split('.') {
        let key = child_key(current, part)?;
        current = current.get(&key)?;
    }
    Some(current.clone())
}

/// Only existing keys can be set, so typos are reported instead of silently dropped.
fn set_json_path(json: &mut Value, path: &str, value: Value) -> anyhow::Result<()> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = json;
    for (i, part) in parts.iter().enumerate() {
        let key = child_key(current, part)
            .ok_or_else(|| anyhow::anyhow!("Unknown config key '{}'", path))?;
        if i == parts.len() - 1 {
            current[&key] = value;
            return Ok(());
        }
        current = &mut current[&key];
    }
    Ok(())
}

fn to_camel_case(s: &str) -> String {
    let mut result = String::new();
    let mut capitalize_next = false;
    for ch in s.chars() {
        if ch == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(ch.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(ch);
        }
    }
    result
}
