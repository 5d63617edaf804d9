//! Executes [`Command`]s against the scheduler and the browser.

use std::collections::BTreeSet;
use std::sync::Arc;
use tabsentinel_core::policy::DEFAULT_EXCLUDED_SITES;
use tabsentinel_core::{Command, CommandResponse, Error, Result, SettingsStore, TabHost};
use tabsentinel_privacy::{classify_cookies, embedded_hosts, PopupBlocker, Whitelist};
use tabsentinel_scheduler::SuspensionScheduler;
use tracing::{debug, info, warn};

use super::support::{active_hosts, active_tabs};

pub struct CommandHandler {
    scheduler: Arc<SuspensionScheduler>,
    host: Arc<dyn TabHost>,
    settings: Arc<dyn SettingsStore>,
    popups: Arc<PopupBlocker>,
}

impl CommandHandler {
    pub fn new(
        scheduler: Arc<SuspensionScheduler>,
        host: Arc<dyn TabHost>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            popups: Arc::new(PopupBlocker::new(host.clone(), settings.clone())),
            scheduler,
            host,
            settings,
        }
    }

    pub fn scheduler(&self) -> &Arc<SuspensionScheduler> {
        &self.scheduler
    }

    pub fn popups(&self) -> &Arc<PopupBlocker> {
        &self.popups
    }

    /// Never fails: errors come back as `{"error": ...}`.
    pub async fn handle(&self, command: Command) -> CommandResponse {
        let action = command.action();
        info!(action, "Handling command");
        match self.execute(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!(action, error = %e, "Command failed");
                CommandResponse::error(e.to_string())
            }
        }
    }

    async fn execute(&self, command: Command) -> Result<CommandResponse> {
        match command {
            Command::SuspendEnable => {
                if !self.scheduler.start() {
                    info!("Suspension timer already running");
                }
                Ok(CommandResponse::ack("enabled"))
            }
            Command::SuspendDisable => {
                let reloaded = self.scheduler.disable().await?;
                info!(reloaded, "Suspension disabled");
                Ok(CommandResponse::ack("disabled"))
            }
            Command::ForceCheck => {
                let report = self.scheduler.sweep().await?;
                Ok(CommandResponse::checked(serde_json::to_value(&report)?))
            }
            Command::FreezeAll => {
                let report = self.scheduler.freeze_all().await?;
                Ok(CommandResponse::counted("frozen", report.frozen.len()))
            }
            Command::UnfreezeAll => {
                let reloaded = self.scheduler.unfreeze_all().await?;
                Ok(CommandResponse::counted("unfrozen", reloaded))
            }
            Command::GetRecommendedSites => Ok(CommandResponse::Sites {
                sites: DEFAULT_EXCLUDED_SITES.iter().map(|s| s.to_string()).collect(),
            }),
            Command::GetAllCookies { first_party_hosts } => {
                let first_party = if first_party_hosts.is_empty() {
                    active_hosts(self.host.as_ref()).await?
                } else {
                    first_party_hosts
                };
                let cookies = self.host.all_cookies().await?;
                let whitelist = Whitelist::load(self.settings.as_ref()).await?;
                let groups = classify_cookies(&cookies, &first_party, &whitelist);
                Ok(CommandResponse::Cookies {
                    cookies: serde_json::to_value(&groups)?,
                })
            }
            Command::ScrubPopups => {
                let report = self.popups.scrub_all().await?;
                Ok(CommandResponse::scrubbed(report.removed))
            }
            Command::GetEmbeddedDomains { tab_id } => {
                let embedded_hosts = match tab_id {
                    Some(tab) => embedded_hosts(self.host.as_ref(), &tab).await?,
                    None => self.active_embedded_hosts().await?,
                };
                Ok(CommandResponse::Embedded { embedded_hosts })
            }
            Command::DeleteCookies { domain, name } => {
                if domain.trim().is_empty() {
                    return Err(Error::Validation("deleteCookies needs a domain".to_string()));
                }
                let deleted = self
                    .host
                    .delete_cookies(domain.trim(), name.as_deref())
                    .await?;
                info!(domain = %domain, deleted, "Deleted cookies");
                Ok(CommandResponse::counted("deleted", deleted))
            }
        }
    }

    /// Union over every active tab. A tab that refuses the script is skipped.
    async fn active_embedded_hosts(&self) -> Result<Vec<String>> {
        let mut hosts = BTreeSet::new();
        for tab in active_tabs(self.host.as_ref()).await? {
            match embedded_hosts(self.host.as_ref(), &tab.id).await {
                Ok(found) => hosts.extend(found),
                Err(e) => debug!(tab_id = %tab.id, error = %e, "Embedded hosts unavailable"),
            }
        }
        Ok(hosts.into_iter().collect())
    }
}
