use serde_json::Value;
use std::time::Duration;
use tabsentinel_core::{Command, Config, TabId};

use super::support::load_config;

/// POST a command to a running daemon and return its JSON reply.
pub async fn post_command(config: &Config, command: &Command, timeout: Duration) -> anyhow::Result<Value> {
    let url = format!("{}/v1/command", config.gateway.base_url());
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let mut request = client.post(&url).json(command);
    if let Some(token) = config.gateway.api_token() {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Daemon not reachable at {}: {}", url, e))?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        anyhow::bail!("Daemon rejected the request: check gateway.apiToken");
    }

    let body: Value = response.json().await?;
    if let Some(err) = body.get("error").and_then(|e| e.as_str()) {
        anyhow::bail!("{} failed ({}): {}", command.action(), status, err);
    }
    Ok(body)
}

/// Arguments that only some actions take.
#[derive(Debug, Default)]
pub struct SendOptions {
    pub first_party: Vec<String>,
    pub domain: Option<String>,
    pub name: Option<String>,
    pub tab: Option<String>,
}

fn parse_command(action: &str, opts: SendOptions) -> anyhow::Result<Command> {
    let command = Command::from_action(action).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown action '{}'. Valid actions: {}",
            action,
            Command::all_actions().join(", ")
        )
    })?;

    let mut unused = Vec::new();
    if !opts.first_party.is_empty() && !matches!(command, Command::GetAllCookies { .. }) {
        unused.push("--first-party");
    }
    if (opts.domain.is_some() || opts.name.is_some())
        && !matches!(command, Command::DeleteCookies { .. })
    {
        unused.push("--domain/--name");
    }
    if opts.tab.is_some() && !matches!(command, Command::GetEmbeddedDomains { .. }) {
        unused.push("--tab");
    }
    if !unused.is_empty() {
        anyhow::bail!("{} cannot be used with {}", unused.join(", "), command.action());
    }

    Ok(match command {
        Command::GetAllCookies { .. } => Command::GetAllCookies {
            first_party_hosts: opts.first_party,
        },
        Command::DeleteCookies { .. } => Command::DeleteCookies {
            domain: opts
                .domain
                .filter(|d| !d.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("deleteCookies needs --domain"))?,
            name: opts.name,
        },
        Command::GetEmbeddedDomains { .. } => Command::GetEmbeddedDomains {
            tab_id: opts.tab.map(TabId::new),
        },
        other => other,
    })
}

pub async fn run(action: &str, opts: SendOptions) -> anyhow::Result<()> {
    let command = parse_command(action, opts)?;
    let (_paths, config) = load_config()?;

    let reply = post_command(&config, &command, Duration::from_secs(120)).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
