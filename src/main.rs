mod setup;

use std::path::PathBuf;

use chainkeys::app::{App, Lifetime, Session};
use chainkeys::config::Settings;
use chainkeys::provider::{HttpConnector, ProviderHandle};
use chainkeys::{ChainKind, TargetKey};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(name = "chainkeys")]
#[command(about = "Provider endpoints, API keys and wallet secrets for a multi-chain wallet")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported chains and networks
    Targets,
    /// Show the resolved provider configuration for a target
    Resolve { chain: ChainKind, network: String },
    /// Connect to a target and query its health endpoint
    Ping { chain: ChainKind, network: String },
    /// Edit provider overrides
    #[command(subcommand)]
    Override(OverrideCommand),
    /// Manage wallets
    #[command(subcommand)]
    Wallet(WalletCommand),
}

#[derive(Subcommand, Debug)]
enum OverrideCommand {
    /// Set a custom endpoint and/or display name
    Set {
        chain: ChainKind,
        network: String,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Store a custom API key (prompted)
    Key { chain: ChainKind, network: String },
    /// Return to the default API key
    ClearKey { chain: ChainKind, network: String },
    /// Remove every override for the target
    Reset { chain: ChainKind, network: String },
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// Create a wallet with a fresh random seed
    Create { name: Option<String> },
    /// List wallets
    List,
    /// Check a wallet passphrase
    UnlockCheck { id: String },
    /// Add an account on a target
    AddAccount {
        id: String,
        chain: ChainKind,
        network: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Delete a wallet and its secret
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let app = App::bootstrap(&settings, Lifetime::Shared)?;
    let session = app.session();

    tracing::debug!("Config file: {:?}", settings.config_path());

    let result = run(&app, &session, cli.command).await;
    session.end().await;

    if let Err(report) = &result {
        if let Some(err) = report.downcast_ref::<chainkeys::Error>() {
            if let chainkeys::Error::UnsupportedTarget { chain, .. } = err {
                eprintln!(
                    "Supported networks for {}: {}",
                    chain,
                    app.registry().networks(*chain).join(", ")
                );
            } else if err.is_configuration() {
                eprintln!("Check provider settings with `chainkeys resolve` and `chainkeys override`");
            }
        }
    }
    result
}

async fn run(app: &App<HttpConnector>, session: &Session<HttpConnector>, command: Command) -> Result<()> {
    match command {
        Command::Targets => {
            for d in app.registry().targets() {
                println!(
                    "{:<10} {:<10} {:<6} {} ({} decimals)",
                    d.chain, d.network, d.symbol, d.display_name, d.decimals
                );
            }
        }
        Command::Resolve { chain, network } => {
            let config = app.resolver().resolve(chain, &network).await?;
            let status = config.status();
            println!("Target:   {}", status.target);
            println!("Endpoint: {} ({:?})", status.endpoint, status.endpoint_source);
            println!("API key:  {:?}", status.key_source);
            if let Some(name) = status.display_name {
                println!("Name:     {}", name);
            }
        }
        Command::Ping { chain, network } => {
            let provider = session.factory.get_provider(chain, &network).await?;
            let health = provider.health().await?;
            println!(
                "{} ({}, {}): {}",
                provider.display_name(),
                provider.target(),
                provider.descriptor().symbol,
                health
            );
        }
        Command::Override(cmd) => run_override(session, cmd).await?,
        Command::Wallet(cmd) => run_wallet(session, cmd).await?,
    }
    Ok(())
}

async fn run_override(session: &Session<HttpConnector>, command: OverrideCommand) -> Result<()> {
    let overrides = &session.overrides;

    match command {
        OverrideCommand::Set {
            chain,
            network,
            endpoint,
            name,
        } => {
            let key = TargetKey::new(chain, network);
            if endpoint.is_none() && name.is_none() {
                return Err(eyre::eyre!("Nothing to set: pass --endpoint and/or --name"));
            }
            if let Some(endpoint) = endpoint {
                overrides.set_endpoint(&key, Some(&endpoint)).await?;
            }
            if let Some(name) = name {
                overrides.set_name(&key, Some(&name)).await?;
            }
            println!("Override saved for {}", key);
        }
        OverrideCommand::Key { chain, network } => {
            let key = TargetKey::new(chain, network);
            let api_key = Zeroizing::new(setup::prompt_secret(&format!("API key for {}", key))?);
            overrides.set_custom_api_key(&key, &api_key).await?;
            println!("API key for {} stored in secure storage", key);
        }
        OverrideCommand::ClearKey { chain, network } => {
            let key = TargetKey::new(chain, network);
            overrides.clear_custom_api_key(&key).await?;
            println!("{} uses the default API key again", key);
        }
        OverrideCommand::Reset { chain, network } => {
            let key = TargetKey::new(chain, network);
            overrides.reset(&key).await?;
            println!("Provider settings for {} reset", key);
        }
    }
    Ok(())
}

async fn run_wallet(session: &Session<HttpConnector>, command: WalletCommand) -> Result<()> {
    let wallets = &session.wallets;

    match command {
        WalletCommand::Create { name } => {
            let name = match name {
                Some(name) => name,
                None => setup::prompt_string("Wallet name")?,
            };
            let passphrase = Zeroizing::new(setup::prompt_new_passphrase()?);
            let wallet = wallets.generate(&name, &passphrase).await?;
            println!("Wallet '{}' created: {}", wallet.name, wallet.id);
        }
        WalletCommand::List => {
            for wallet in wallets.list().await? {
                println!(
                    "{}  {:<20} {} account(s), created {}",
                    setup::short_id(&wallet.id),
                    wallet.name,
                    wallet.accounts.len(),
                    wallet.created_at.format("%Y-%m-%d")
                );
            }
        }
        WalletCommand::UnlockCheck { id } => {
            let passphrase = Zeroizing::new(setup::prompt_secret("Wallet passphrase")?);
            wallets.unlock(&id, &passphrase).await?;
            println!("Passphrase accepted");
        }
        WalletCommand::AddAccount {
            id,
            chain,
            network,
            label,
        } => {
            let passphrase = Zeroizing::new(setup::prompt_secret("Wallet passphrase")?);
            wallets.unlock(&id, &passphrase).await?;
            let account = wallets
                .add_account(&id, TargetKey::new(chain, network), label.as_deref())
                .await?;
            println!("Account #{} added on {}", account.index, account.target);
        }
        WalletCommand::Remove { id } => {
            if !setup::prompt_yes_no(&format!("Delete wallet {} and its secret?", id))? {
                return Ok(());
            }
            wallets.remove(&id).await?;
            println!("Wallet {} removed", id);
        }
    }
    Ok(())
}
