//! pzkeeper - Restart scheduler and mod tooling for Project Zomboid servers
//!
//! # Usage
//!
//! ```text
//! pzkeeper [--config-dir <dir>] [--instance <name>] [--debug] <command>
//!
//! pzkeeper schedule                 Run the restart scheduler until stopped
//! pzkeeper next-restart             Show the next scheduled restart
//! pzkeeper check-updates            Check installed workshop items for updates
//! pzkeeper resolve-deps <ids>...    Show the workshop dependency closure
//! pzkeeper sort-mods                Compute a dependency-first load order
//! pzkeeper players                  List connected players
//! pzkeeper broadcast <message>      Send a server message
//! pzkeeper kick <user> [--reason]   Kick a player
//! pzkeeper ban <user> [--reason]    Ban a player
//! ```
//!
//! Everything runs on a single-threaded tokio runtime: the scheduler awaits
//! each network, process and file operation in turn.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use pzkeeper::models::{DEFAULT_INSTANCE, InstanceConfig};
use pzkeeper::scheduler::describe_next_restart;
use pzkeeper::services::{
    CommandBackup, MetadataCache, ModGraph, RconClient, ServerIni, SteamWorkshopApi,
    SystemdService, UpdateChecker, diff_load_order, merge_resolved,
};
use pzkeeper::{APP_NAME, ConfigManager, Scheduler, SystemClock, VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "pzkeeper",
    version,
    about = "Unattended restarts, RCON and workshop mod tooling for Project Zomboid servers",
    long_about = None,
)]
struct Cli {
    /// Configuration directory (default: ~/.config/pzkeeper)
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    /// Server instance to operate on
    #[arg(long, global = true, default_value = DEFAULT_INSTANCE)]
    instance: String,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the restart scheduler until interrupted.
    Schedule,

    /// Show when the next scheduled restart happens.
    NextRestart,

    /// Check the instance's workshop items for newer versions.
    CheckUpdates,

    /// Resolve the full workshop dependency closure of the given items.
    ResolveDeps {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Sort the active mods so every mod loads after its requirements.
    SortMods,

    /// List connected players.
    Players,

    /// Broadcast a message to all players.
    Broadcast { message: String },

    /// Kick a player.
    Kick {
        user: String,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Ban a player.
    Ban {
        user: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(ConfigManager::default_config_dir);
    let configs = ConfigManager::new(&config_dir)?;

    let log_dir = configs.log_dir();
    let _guard = pzkeeper::logging::setup_logging_with_console(
        log_dir.as_str(),
        APP_NAME,
        cli.debug,
        true,
    )?;
    tracing::info!("Starting {} v{} ({:?})", APP_NAME, VERSION, cli.command);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(cli, configs))
}

async fn run(cli: Cli, configs: ConfigManager) -> Result<()> {
    let instance = cli.instance;

    match cli.command {
        Commands::Schedule => {
            let cache =
                MetadataCache::open(SteamWorkshopApi::new()?, configs.workshop_cache_path());
            let mut scheduler = Scheduler::new(
                instance,
                configs,
                SystemClock,
                |config: &InstanceConfig| RconClient::from_config(config),
                SystemdService::new(),
                CommandBackup::new(),
                UpdateChecker::new(cache),
            );
            scheduler.run_until(shutdown_signal()).await;
        }

        Commands::NextRestart => {
            let config = configs.load_instance_config(&instance)?;
            let now = chrono::Local::now().naive_local();
            println!("Next restart: {}", describe_next_restart(&config.restart_times, now));
        }

        Commands::CheckUpdates => {
            let config = configs.load_instance_config(&instance)?;
            let cache =
                MetadataCache::open(SteamWorkshopApi::new()?, configs.workshop_cache_path());
            let mut checker = UpdateChecker::new(cache);

            let updated = checker.check(&config).await?;
            if updated.is_empty() {
                println!("All workshop items are up to date.");
            } else {
                println!("{} workshop item(s) have updates:", updated.len());
                for id in &updated {
                    println!("  {}  {}", id, checker.cache().title(id));
                }
            }
        }

        Commands::ResolveDeps { ids } => {
            let mut cache =
                MetadataCache::open(SteamWorkshopApi::new()?, configs.workshop_cache_path());
            let resolved = cache.resolve_dependencies(&ids).await;
            for id in &resolved {
                println!("{}  {}", id, cache.title(id));
            }

            let config = configs.load_instance_config(&instance)?;
            let ini_path = config.server_ini_path();
            if ini_path.exists() {
                let mut workshop_items = ServerIni::load(&ini_path)?.workshop_items;
                let added = merge_resolved(&mut workshop_items, resolved);
                println!();
                println!("{} item(s) missing from {}", added, ini_path);
                if added > 0 {
                    println!("WorkshopItems={}", workshop_items.join(";"));
                }
            }
        }

        Commands::SortMods => {
            let config = configs.load_instance_config(&instance)?;
            let ini = ServerIni::load(&config.server_ini_path())?;
            let graph = ModGraph::scan(&config.workshop_content_dir(), &ini.workshop_items);
            let sorted = graph.sort(&ini.mods);

            let missing = graph.missing(&ini.mods);
            if !missing.is_empty() {
                tracing::warn!("Active mods not found in workshop content: {}", missing.join(", "));
                println!("Not downloaded (order unchecked): {}", missing.join(", "));
            }

            let changes = diff_load_order(&ini.mods, &sorted);
            if changes.is_empty() {
                println!("Load order already satisfies all requirements.");
            } else {
                println!("{} position(s) change:", changes.len());
                for change in &changes {
                    println!("  {}", change);
                }
                println!();
                println!("Mods={}", sorted.join(";"));
            }
        }

        Commands::Players => {
            let mut rcon = connected_client(&configs, &instance).await?;
            let players = rcon.list_players().await;
            println!("Players connected ({}):", players.len());
            for player in &players {
                println!("  {}", player.name);
            }
            if rcon.is_admin_online().await {
                println!("Admin is online.");
            }
            rcon.disconnect();
        }

        Commands::Broadcast { message } => {
            let mut rcon = connected_client(&configs, &instance).await?;
            println!("{}", rcon.broadcast(&message).await);
            rcon.disconnect();
        }

        Commands::Kick { user, reason } => {
            let mut rcon = connected_client(&configs, &instance).await?;
            println!("{}", rcon.kick(&user, &reason).await);
            rcon.disconnect();
        }

        Commands::Ban { user, reason } => {
            let mut rcon = connected_client(&configs, &instance).await?;
            println!("{}", rcon.ban(&user, &reason).await);
            rcon.disconnect();
        }
    }

    Ok(())
}

async fn connected_client(configs: &ConfigManager, instance: &str) -> Result<RconClient> {
    let config = configs.load_instance_config(instance)?;
    let mut rcon = RconClient::from_config(&config);
    if !rcon.connect().await {
        bail!(
            "Could not connect to RCON at {}:{}",
            config.rcon_host,
            config.rcon_port
        );
    }
    Ok(rcon)
}

/// Completes on Ctrl-C, or on SIGTERM when running under a service manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
