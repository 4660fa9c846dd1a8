#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use codewarden::config::{self, Config, ConfigStore};
use codewarden::ConfigCommands;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// `codewarden` - Discord staff bot with CODE alerts and a self-restart scheduler.
#[derive(Parser, Debug)]
#[command(name = "codewarden")]
#[command(version)]
#[command(about = "Discord staff bot: CODE alerts, staff commands, welcome menus.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to Discord and run until restarted or interrupted
    Daemon {
        /// Keep-alive port; defaults to `[gateway] port`
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep-alive bind address; defaults to `[gateway] host`
        #[arg(long)]
        host: Option<String>,
    },

    /// Show resolved configuration and persisted state
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both ring and aws-lc-rs may be linked; pick one explicitly.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("CODEWARDEN_CONFIG_DIR", config_dir);
    }

    // Schema output stays stdout-only: no config load, no logging.
    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(config::Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    // Respects RUST_LOG, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load_or_init().await?;

    match cli.command {
        Commands::Daemon { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            config.validate()?;
            info!(
                "🛡️ Starting codewarden daemon (keep-alive on {}:{})",
                config.gateway.host, config.gateway.port
            );
            codewarden::daemon::run(config).await
        }

        Commands::Status => print_status(&config).await,

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => unreachable!("handled before config load"),
            ConfigCommands::Path => {
                println!("{}", config.config_path.display());
                Ok(())
            }
        },
    }
}

async fn print_status(config: &Config) -> Result<()> {
    let yes_no = |b: bool| if b { "✅" } else { "❌" };

    println!("🛡️ codewarden status");
    println!();
    println!("Version:     {}", env!("CARGO_PKG_VERSION"));
    println!("Config:      {}", config.config_path.display());
    println!("Data dir:    {}", config.data_dir().display());
    println!("Token:       {}", yes_no(config.require_token().is_ok()));
    println!("Owner:       {}", config.owner_id);
    println!(
        "Log channel: {}",
        config
            .log_channel_id
            .map_or_else(|| "(disabled)".to_string(), |id| id.to_string())
    );
    println!(
        "Keep-alive:  {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "Liveness:    {} every {}s",
        config.liveness.url, config.liveness.interval_secs
    );
    println!("Restart via: {:?}", config.lifecycle.restart_mode);

    let store = ConfigStore::open(&config.data_dir())?;
    let operational = store.operational();
    println!();
    println!("⚙️ Operational");
    println!(
        "  Auto-restart:     every {} minutes",
        operational.restart_interval_minutes()
    );
    println!(
        "  Allowed roles:    {}",
        if operational.allowed_roles.is_empty() {
            "None".to_string()
        } else {
            operational.allowed_roles.join(", ")
        }
    );
    println!(
        "  Shutdown default: {} minute(s)",
        operational.shutdown_default_minutes
    );

    let welcome = store.welcome();
    println!();
    println!("👋 Welcome/goodbye");
    println!(
        "  Channel:  {}",
        welcome
            .welcome_channel_id
            .map_or_else(|| "Not Set".to_string(), |id| format!("{id}"))
    );
    println!("  Welcome:  {} {}", yes_no(welcome.welcome_enabled), welcome.welcome_message);
    println!("  Goodbye:  {} {}", yes_no(welcome.goodbye_enabled), welcome.goodbye_message);

    let state_path = codewarden::daemon::state_file_path(config);
    if let Ok(raw) = tokio::fs::read(&state_path).await {
        let state: serde_json::Value = serde_json::from_slice(&raw)?;
        println!();
        println!("🩺 Last daemon state ({})", state_path.display());
        if let Some(facts) = codewarden::health::restore_runtime_from(&state) {
            println!(
                "  Last restart:   {}",
                facts.last_restart.as_deref().unwrap_or("No restart recorded yet")
            );
            println!(
                "  Last self-ping: {}",
                facts.last_self_ping.as_deref().unwrap_or("Never")
            );
        }
        if let Some(components) = state["components"].as_object() {
            for (name, health) in components {
                println!(
                    "  {name:<12} {}",
                    health["status"].as_str().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(())
}
