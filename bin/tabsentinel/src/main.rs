mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabsentinel")]
#[command(about = "Suspends idle browser tabs to save memory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the browser and run the suspender (long-running daemon)
    Run {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Launch a browser instead of attaching to one
        #[arg(long)]
        launch: bool,
    },

    /// Send a command to the running daemon
    Send {
        /// Action name, e.g. suspend:forceCheck, freezeAll, unfreezeAll
        action: String,

        /// First-party hosts for getAllCookies
        #[arg(long = "first-party")]
        first_party: Vec<String>,

        /// Cookie domain for deleteCookies
        #[arg(long)]
        domain: Option<String>,

        /// Cookie name for deleteCookies
        #[arg(long)]
        name: Option<String>,

        /// Tab id for getEmbeddedDomains (defaults to the active tabs)
        #[arg(long)]
        tab: Option<String>,
    },

    /// Show what the next sweep would do with every open tab
    Explain {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Classify the browser's cookies
    Cookies {
        #[command(subcommand)]
        command: Option<CookiesCommands>,

        /// Only show cookies belonging to this host, plus those of hosts it embeds
        #[arg(long)]
        host: Option<String>,
    },

    /// Show configuration, settings and daemon status
    Status,

    /// Manage suspension settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Manage daemon configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print all settings
    Show,
    /// Turn automatic suspension on
    Enable,
    /// Turn automatic suspension off and wake every frozen tab
    Disable,
    /// Minutes of inactivity before a tab is suspended (1-1440)
    Delay { minutes: u64 },
    /// Never suspend tabs on this host
    Exclude { host: String },
    /// Remove a host from the exclusion list
    Include { host: String },
    /// Add the recommended exclusions
    Recommend,
    /// Reset all settings to defaults
    Clear,
    /// Manage the cookie whitelist
    Whitelist {
        #[command(subcommand)]
        command: WhitelistCommands,
    },
}

#[derive(Subcommand)]
enum WhitelistCommands {
    /// List whitelisted cookie domains
    Show,
    /// Never count this domain's cookies as analytics or suspicious
    Add { domain: String },
    /// Remove a domain from the whitelist
    Remove { domain: String },
}

#[derive(Subcommand)]
enum CookiesCommands {
    /// Delete cookies set for a domain and its subdomains
    Delete {
        #[arg(long)]
        domain: String,

        /// Only delete cookies with this name
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the configuration as JSON
    Show,
    /// Print the configuration file path
    Path,
    /// Get a config value by dot-separated key (e.g. browser.debugPort)
    Get { key: String },
    /// Set a config value by dot-separated key
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { port, host, launch } => {
            commands::gateway::run(host, port, launch).await?;
        }
        Commands::Send {
            action,
            first_party,
            domain,
            name,
            tab,
        } => {
            let opts = commands::send::SendOptions {
                first_party,
                domain,
                name,
                tab,
            };
            commands::send::run(&action, opts).await?;
        }
        Commands::Explain { json } => {
            commands::explain::run(json).await?;
        }
        Commands::Cookies { command, host } => match command {
            Some(CookiesCommands::Delete { domain, name }) => {
                commands::cookies_cmd::delete(&domain, name.as_deref()).await?
            }
            None => commands::cookies_cmd::run(host).await?,
        },
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Show => commands::settings_cmd::show().await?,
            SettingsCommands::Enable => commands::settings_cmd::enable().await?,
            SettingsCommands::Disable => commands::settings_cmd::disable().await?,
            SettingsCommands::Delay { minutes } => commands::settings_cmd::delay(minutes).await?,
            SettingsCommands::Exclude { host } => commands::settings_cmd::exclude(&host).await?,
            SettingsCommands::Include { host } => commands::settings_cmd::include(&host).await?,
            SettingsCommands::Recommend => commands::settings_cmd::recommend().await?,
            SettingsCommands::Clear => commands::settings_cmd::clear().await?,
            SettingsCommands::Whitelist { command } => match command {
                WhitelistCommands::Show => commands::settings_cmd::whitelist_show().await?,
                WhitelistCommands::Add { domain } => commands::settings_cmd::whitelist_add(&domain).await?,
                WhitelistCommands::Remove { domain } => {
                    commands::settings_cmd::whitelist_remove(&domain).await?
                }
            },
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show().await?,
            ConfigCommands::Path => commands::config_cmd::path().await?,
            ConfigCommands::Get { key } => commands::config_cmd::get(&key).await?,
            ConfigCommands::Set { key, value } => commands::config_cmd::set(&key, &value).await?,
        },
    }

    Ok(())
}
