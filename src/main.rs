use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use escrow_bot::config::{AppConfig, ResolvedConfig};
use escrow_bot::context::AppContext;
use escrow_bot::escrow::{ActivationStore, Currency};
use escrow_bot::monitor::{
    BlockchairSource, ChainRouter, DepositMonitor, MonitorSettings, SolanaRpcSource,
};
use escrow_bot::shutdown::{recv_shutdown, ShutdownCoordinator};
use escrow_bot::store::Store;
use escrow_bot::transport::discord::{
    commands, router, DiscordRest, DiscordSettings, InteractionState,
};
use escrow_bot::wallet::AddressIssuer;

#[derive(Parser, Debug)]
#[command(name = "escrow-bot", version, about = "Middleman escrow bot")]
struct Cli {
    /// Path to the TOML config (missing file = env/defaults only)
    #[arg(long, default_value = "escrow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interactions endpoint and the deposit monitor (default)
    Serve,
    /// Overwrite the guild's slash commands
    RegisterCommands,
    /// Print fresh activation keys
    GenKey {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Print the deposit address for a currency and trade index
    DeriveAddress { currency: String, index: i64 },
}

fn init_tracing() {
    // ESCROW_LOG wins over RUST_LOG
    let filter = std::env::var("ESCROW_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn discord_settings(cfg: &ResolvedConfig) -> Result<DiscordSettings> {
    Ok(DiscordSettings {
        api_base: cfg.api_base.clone(),
        token: cfg.require_token()?.to_string(),
        application_id: cfg.require_application_id()?.to_string(),
        guild_id: cfg.require_guild_id()?.to_string(),
        ticket_category: cfg.ticket_category.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let cfg = AppConfig::load_from(&cli.config)?.resolved();

    match cli.cmd.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::RegisterCommands => {
            let rest = DiscordRest::new(discord_settings(&cfg)?);
            let n = rest
                .register_commands(&commands::definitions())
                .await
                .context("registering slash commands")?;
            println!("registered {} commands", n);
            Ok(())
        }
        Commands::GenKey { count } => {
            let store = Store::open(&cfg.db_path)?;
            let keys = ActivationStore::new(store);
            for _ in 0..count {
                println!("{}", keys.issue_key(None)?);
            }
            Ok(())
        }
        Commands::DeriveAddress { currency, index } => {
            let currency: Currency = currency.parse()?;
            let phrase = cfg
                .mnemonic
                .as_deref()
                .context("BOT_MNEMONIC is not set")?;
            let issuer = AddressIssuer::from_mnemonic(phrase)?;
            println!("{}", issuer.derive_address(currency, index)?);
            Ok(())
        }
    }
}

async fn serve(cfg: ResolvedConfig) -> Result<()> {
    // the credential is fatal; the seed only disables trading
    let settings = discord_settings(&cfg)?;
    let public_key = cfg.require_public_key()?.to_string();
    info!(
        token = "set",
        owner = cfg.owner_id.as_deref().unwrap_or("unset"),
        mnemonic = if cfg.mnemonic.is_some() { "set" } else { "unset" },
        "Escrow bot starting up"
    );
    if cfg.owner_id.is_none() {
        warn!("OWNER_ID not set; owner-only commands are unavailable");
    }

    let store = Store::open(&cfg.db_path)
        .with_context(|| format!("opening {}", cfg.db_path.display()))?;
    let issuer = AddressIssuer::from_config(cfg.mnemonic.as_deref());
    let rest = DiscordRest::new(settings);
    let port = cfg.port;
    let monitor_settings = MonitorSettings {
        poll_secs: cfg.poll_secs,
        min_deposit_units: cfg.min_deposit_units,
    };
    let chains = ChainRouter {
        blockchair: Some(BlockchairSource::new(
            cfg.blockchair_url.clone(),
            cfg.blockchair_key.clone(),
            cfg.btc_conf,
            cfg.ltc_conf,
        )),
        solana: Some(SolanaRpcSource::new(cfg.solana_rpc_url.clone())),
    };

    let ctx = AppContext::new(cfg, store, issuer, Arc::new(rest.clone()));
    let state = InteractionState::new(ctx.clone(), &public_key, rest)?;

    let shutdown = ShutdownCoordinator::new();
    let monitor = DepositMonitor::new(ctx.controller.clone(), Arc::new(chains), monitor_settings);
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));
    let server_shutdown = recv_shutdown(shutdown.subscribe());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(listen = %addr, "Interactions endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(server_shutdown)
        .await
        .context("http server")?;

    if let Err(e) = monitor_task.await {
        warn!("deposit monitor task ended abnormally: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}
