mod cli;
mod commands;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use portal_auth::{
    Detached, FileCredentialStore, Location, PortalClient, PortalConfig, SharedLocation,
};
use tracing::{debug, error};

use crate::cli::{Args, Commands};
use crate::commands::CommandExecutor;
use crate::logging::init_logging;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse_with_dotenv(None, std::env::args_os()).unwrap_or_else(|e| e.exit());

    if let Err(e) = init_logging(args.log_level.as_deref(), args.json_logs) {
        eprintln!("Error: {e:#}");
        std::process::exit(2);
    }

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PortalConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PortalConfig::default().with_env_overrides()?,
    };
    debug!(base_url = %config.base_url, "Loaded configuration");

    let store = FileCredentialStore::open(&args.store)
        .await
        .with_context(|| format!("Failed to open credential store {}", args.store.display()))?;

    let shared = args.location.as_deref().map(SharedLocation::new);
    let location: Arc<dyn Location> = match &shared {
        Some(shared) => Arc::new(shared.clone()),
        None => Arc::new(Detached),
    };

    let client = PortalClient::builder(config)
        .store(Arc::new(store))
        .location(location)
        .build()
        .context("Failed to build portal client")?;
    let login_path = client.config().login_path.clone();
    let executor = CommandExecutor::new(client);

    let result = match args.command {
        Commands::Login {
            role,
            endpoint,
            fields,
        } => executor.login(role, &endpoint, fields).await,
        Commands::Logout { role } => executor.logout(role).await,
        Commands::Request {
            method,
            path,
            data,
            role,
        } => executor.request(method, &path, data.as_deref(), role).await,
        Commands::Refresh { role } => executor.refresh(role).await,
        Commands::Whoami => executor.whoami().await,
        Commands::Routes => {
            executor.routes();
            Ok(())
        }
    };

    if shared.is_some_and(|s| s.navigations() > 0) {
        eprintln!("Session expired; sign in again at {login_path}");
    }

    result
}
