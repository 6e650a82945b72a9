//! dallyrpg entry point.
//!
//! Loads the config, opens (or creates) the player store, builds the game
//! engine, and drives the reconnect loop. Each pass hands one server to
//! [`dallyrpg::irc::net::run_session`], which owns the connection until it
//! drops or the bot quits.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dallyrpg::core::config::{Config, ConfigHandle};
use dallyrpg::core::error::Result;
use dallyrpg::game::{GameBot, GameDb};
use dallyrpg::irc::net;

#[derive(Parser, Debug)]
#[command(name = "dallyrpg", about = "Idle RPG IRC bot", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(default_value = "dallyrpg.toml")]
    config: PathBuf,

    /// Override a config key for this run, as key=value. Repeatable.
    #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut conf = Config::load(&args.config)?;
    for pair in &args.overrides {
        let (key, val) = pair.split_once('=').ok_or_else(|| {
            dallyrpg::core::error::DallyError::Config(format!(
                "override '{pair}' is not key=value"
            ))
        })?;
        conf.set_key(key, val)
            .map_err(dallyrpg::core::error::DallyError::Config)?;
    }
    if let Ok(pass) = std::env::var("BOTPASS") {
        conf.bot_password = Some(pass);
    }
    conf.validate()
        .map_err(dallyrpg::core::error::DallyError::Config)?;
    Ok(conf)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dallyrpg=info")),
        )
        .init();

    let args = Args::parse();
    let conf = load_config(&args)?;
    info!("dallyrpg starting; data dir {}", conf.datadir.display());

    let mut db = GameDb::from_config(&conf);
    if db.exists() {
        db.load()?;
        info!("loaded {} players", db.count());
    } else {
        db.create()?;
        info!("created a fresh player store");
    }

    let handle = ConfigHandle::new(conf);
    let mut bot = GameBot::new(handle.clone(), db, args.config.clone())?;

    let mut server_idx = 0usize;
    loop {
        let cfg = handle.snapshot();
        let server = cfg.servers[server_idx % cfg.servers.len()].clone();
        server_idx += 1;

        match net::run_session(&handle, &mut bot, &server).await {
            Ok(()) => info!("session with {server} ended"),
            Err(e) => {
                if bot.shutdown_requested() {
                    error!("fatal error during shutdown: {e}");
                    return Err(e);
                }
                warn!("session with {server} failed: {e}");
            }
        }

        if bot.shutdown_requested() {
            info!("shutdown requested, exiting");
            break;
        }
        let cfg = handle.snapshot();
        if !cfg.reconnect {
            info!("reconnect disabled, exiting");
            break;
        }
        info!("reconnecting in {}s", cfg.reconnect_wait);
        tokio::time::sleep(Duration::from_secs(cfg.reconnect_wait)).await;
    }
    Ok(())
}
