pub mod config;
pub mod error;
pub mod host;
pub mod message;
pub mod paths;
pub mod policy;
pub mod script;
pub mod settings;
pub mod tab;

pub use config::Config;
pub use error::{Error, Result};
pub use host::TabHost;
#[cfg(any(test, feature = "test-util"))]
pub use host::memory::{MemoryPage, MemoryTabHost};
pub use message::{Command, CommandResponse};
pub use paths::Paths;
pub use policy::Policy;
pub use script::PageScript;
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use tab::{RawCookie, TabId, TabSnapshot};
