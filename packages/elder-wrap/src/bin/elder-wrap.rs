//! Elder Wrap binary.

use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use elder_wrap::{create_router, AppState, Config, KeyRegistry, SigningIdentity};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "elder-wrap", version, about = "Relay rollapp transactions onto the Elder router chain")]
struct Cli {
    /// Config file path, extension optional.
    #[arg(long, global = true, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the JSON-RPC relay.
    Server,
    /// Manage signing keys.
    #[command(subcommand)]
    Keystore(KeystoreCommand),
}

#[derive(Subcommand)]
enum KeystoreCommand {
    /// Import a hex private key.
    Import { alias: String, private_key: String },
    List,
    Get { alias: String },
    Delete { alias: String },
    /// Find the identity owning a rollapp (EVM) address.
    FindEvm { address: String },
    /// Find the identity owning an Elder (bech32) address.
    FindElder { address: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter().into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Server => serve(config).await,
        Command::Keystore(cmd) => {
            config.validate_key_store()?;
            let registry = KeyRegistry::open_from_env(&config.key_store_dir, &config.bech32_prefix)?;
            keystore(&registry, cmd)?;
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = config.validate() {
        error!(error = %e, "FATAL: invalid configuration");
        std::process::exit(1);
    }

    info!("Starting Elder Wrap");
    info!(
        elder = %config.elder_endpoint,
        rollapps = config.rollup_rpcs.len(),
        key_store = %config.key_store_dir,
        "Configuration loaded"
    );

    let bind_address = config.bind_address();
    let state = Arc::new(AppState::new(config).await?);

    info!(identities = state.locks.identity_count(), "Elder Wrap ready");

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining in-flight submissions...");

    let drain_deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
    loop {
        let in_flight = state.locks.total_in_flight();
        if in_flight == 0 {
            info!("All in-flight submissions drained");
            break;
        }
        if tokio::time::Instant::now() >= drain_deadline {
            warn!(remaining = in_flight, "Drain timeout, some submissions may be unconfirmed");
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    info!(
        submissions = state.locks.total_submissions(),
        "Elder Wrap shut down gracefully"
    );
    Ok(())
}

fn keystore(registry: &KeyRegistry, cmd: KeystoreCommand) -> Result<(), elder_wrap::Error> {
    match cmd {
        KeystoreCommand::Import { alias, private_key } => {
            print_identity(&registry.import_key(&alias, &private_key)?);
        }
        KeystoreCommand::List => {
            let identities = registry.list()?;
            if identities.is_empty() {
                println!("no keys in {}", registry.dir().display());
            }
            for identity in &identities {
                print_identity(identity);
            }
        }
        KeystoreCommand::Get { alias } => print_identity(&registry.get(&alias)?),
        KeystoreCommand::Delete { alias } => {
            registry.delete(&alias)?;
            println!("deleted {alias}");
        }
        KeystoreCommand::FindEvm { address } => {
            let address: Address = address
                .parse()
                .map_err(|e| elder_wrap::Error::InvalidRequest(format!("bad address {address}: {e}")))?;
            let found = registry.find_by_rollapp_address(&address)?;
            print_found(found, &address.to_string())?;
        }
        KeystoreCommand::FindElder { address } => {
            let found = registry.find_by_router_address(&address)?;
            print_found(found, &address)?;
        }
    }
    Ok(())
}

fn print_found(found: Option<SigningIdentity>, address: &str) -> Result<(), elder_wrap::Error> {
    let identity = found.ok_or_else(|| elder_wrap::Error::KeyNotFound(address.to_string()))?;
    print_identity(&identity);
    Ok(())
}

fn print_identity(identity: &SigningIdentity) {
    println!(
        "{}\t{}\t{}",
        identity.alias(),
        identity.rollapp_address(),
        identity.router_address()
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
