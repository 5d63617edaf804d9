use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tab::TabId;

/// Out-of-band actions accepted by the daemon, shaped as `{"action": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    #[serde(rename = "suspend:enable")]
    SuspendEnable,
    #[serde(rename = "suspend:disable")]
    SuspendDisable,
    #[serde(rename = "suspend:forceCheck")]
    ForceCheck,
    #[serde(rename = "freezeAll")]
    FreezeAll,
    #[serde(rename = "unfreezeAll")]
    UnfreezeAll,
    #[serde(rename = "getRecommendedSites")]
    GetRecommendedSites,
    #[serde(rename = "getAllCookies")]
    GetAllCookies {
        /// Hosts treated as first party. Empty means "the active tab's host".
        #[serde(default, rename = "firstPartyHosts")]
        first_party_hosts: Vec<String>,
    },
    #[serde(rename = "popups:scrub")]
    ScrubPopups,
    #[serde(rename = "getEmbeddedDomains")]
    GetEmbeddedDomains {
        /// Tab to inspect. Absent means every active tab.
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    #[serde(rename = "deleteCookies")]
    DeleteCookies {
        /// Cookies set for this domain or its subdomains. Must not be blank.
        #[serde(default)]
        domain: String,
        /// Only cookies with this name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Self::SuspendEnable => "suspend:enable",
            Self::SuspendDisable => "suspend:disable",
            Self::ForceCheck => "suspend:forceCheck",
            Self::FreezeAll => "freezeAll",
            Self::UnfreezeAll => "unfreezeAll",
            Self::GetRecommendedSites => "getRecommendedSites",
            Self::GetAllCookies { .. } => "getAllCookies",
            Self::ScrubPopups => "popups:scrub",
            Self::GetEmbeddedDomains { .. } => "getEmbeddedDomains",
            Self::DeleteCookies { .. } => "deleteCookies",
        }
    }

    /// Parse a bare action name, as typed on the command line.
    pub fn from_action(action: &str) -> Option<Self> {
        let cmd = match action.trim() {
            "suspend:enable" => Self::SuspendEnable,
            "suspend:disable" => Self::SuspendDisable,
            "suspend:forceCheck" => Self::ForceCheck,
            "freezeAll" => Self::FreezeAll,
            "unfreezeAll" => Self::UnfreezeAll,
            "getRecommendedSites" => Self::GetRecommendedSites,
            "getAllCookies" => Self::GetAllCookies {
                first_party_hosts: Vec::new(),
            },
            "popups:scrub" => Self::ScrubPopups,
            "getEmbeddedDomains" => Self::GetEmbeddedDomains { tab_id: None },
            "deleteCookies" => Self::DeleteCookies {
                domain: String::new(),
                name: None,
            },
            _ => return None,
        };
        Some(cmd)
    }

    pub fn all_actions() -> &'static [&'static str] {
        &[
            "suspend:enable",
            "suspend:disable",
            "suspend:forceCheck",
            "freezeAll",
            "unfreezeAll",
            "getRecommendedSites",
            "getAllCookies",
            "popups:scrub",
            "getEmbeddedDomains",
            "deleteCookies",
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<Value>,
    },
    Sites {
        sites: Vec<String>,
    },
    Cookies {
        cookies: Value,
    },
    Embedded {
        #[serde(rename = "embeddedHosts")]
        embedded_hosts: Vec<String>,
    },
    Error {
        error: String,
    },
}

impl CommandResponse {
    pub fn ack(status: &str) -> Self {
        Self::Status {
            status: status.to_string(),
            count: None,
            removed: None,
            report: None,
        }
    }

    pub fn counted(status: &str, count: usize) -> Self {
        Self::Status {
            status: status.to_string(),
            count: Some(count),
            removed: None,
            report: None,
        }
    }

    pub fn scrubbed(removed: u64) -> Self {
        Self::Status {
            status: "scrubbed".to_string(),
            count: None,
            removed: Some(removed),
            report: None,
        }
    }

    pub fn checked(report: Value) -> Self {
        Self::Status {
            status: "checked".to_string(),
            count: None,
            removed: None,
            report: Some(report),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_actions_match_names() {
        for action in Command::all_actions() {
            let cmd = Command::from_action(action).unwrap();
            assert_eq!(cmd.action(), *action);
            let parsed: Command = serde_json::from_value(json!({ "action": action })).unwrap();
            assert_eq!(parsed, cmd);
        }
        assert!(Command::from_action("reboot").is_none());
    }

    #[test]
    fn test_cookie_command_carries_hosts() {
        let parsed: Command = serde_json::from_value(json!({
            "action": "getAllCookies",
            "firstPartyHosts": ["example.com"]
        }))
        .unwrap();
        assert_eq!(
            parsed,
            Command::GetAllCookies {
                first_party_hosts: vec!["example.com".to_string()]
            }
        );
    }

    #[test]
    fn test_cookie_management_commands() {
        let parsed: Command = serde_json::from_value(json!({
            "action": "deleteCookies",
            "domain": "tracker.example",
            "name": "_id"
        }))
        .unwrap();
        assert_eq!(
            parsed,
            Command::DeleteCookies {
                domain: "tracker.example".to_string(),
                name: Some("_id".to_string())
            }
        );

        let parsed: Command =
            serde_json::from_value(json!({"action": "getEmbeddedDomains", "tabId": "T1"})).unwrap();
        assert_eq!(
            parsed,
            Command::GetEmbeddedDomains {
                tab_id: Some(TabId::from("T1"))
            }
        );
        assert_eq!(
            serde_json::to_value(Command::GetEmbeddedDomains { tab_id: None }).unwrap(),
            json!({"action": "getEmbeddedDomains"})
        );

        let embedded: CommandResponse =
            serde_json::from_value(json!({"embeddedHosts": ["cdn.example"]})).unwrap();
        assert_eq!(
            embedded,
            CommandResponse::Embedded {
                embedded_hosts: vec!["cdn.example".to_string()]
            }
        );
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(CommandResponse::ack("enabled")).unwrap(),
            json!({"status": "enabled"})
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::counted("frozen", 3)).unwrap(),
            json!({"status": "frozen", "count": 3})
        );
        assert_eq!(
            serde_json::to_value(CommandResponse::scrubbed(2)).unwrap(),
            json!({"status": "scrubbed", "removed": 2})
        );
        let sites: CommandResponse =
            serde_json::from_value(json!({"sites": ["zoom.us"]})).unwrap();
        assert_eq!(
            sites,
            CommandResponse::Sites {
                sites: vec!["zoom.us".to_string()]
            }
        );
        let err: CommandResponse = serde_json::from_value(json!({"error": "nope"})).unwrap();
        assert!(err.is_error());
    }
}
