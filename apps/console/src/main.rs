use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientEvent, FlowError, NameServiceClient, NetworkProfile, TLD};
use registry::WalletRegistry;
use shared::domain::{Mint, NetworkState};
use tokio::sync::broadcast;
use wallet_integration::{HttpWalletGateway, Wallet};

mod config;

/// How long to keep listening for flow events (notices, the deferred
/// mint-list refresh) before giving the prompt back.
const FLOW_REPORT_WINDOW: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "console", about = "Music name service console")]
struct Cli {
    /// Settings file; defaults to ./console.toml
    #[arg(long)]
    config: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the connected account and network state
    Status,
    /// Prompt the wallet for account access
    Connect,
    /// Move the wallet onto the expected test network
    SwitchNetwork,
    /// List every minted name with its record and owner
    List,
    /// Register a name and attach a streaming record to it
    Mint { domain: String, record_url: String },
    /// Replace the record of a name you already own
    SetRecord { domain: String, record_url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref());
    let contract: Address = settings
        .contract_address
        .parse()
        .context("invalid contract address in settings")?;

    let wallet = Wallet::new(Arc::new(HttpWalletGateway::connect(&settings.bridge_url)?));

    match cli.command {
        Command::Status => status(wallet, contract).await,
        Command::Connect => connect(wallet, contract).await,
        Command::SwitchNetwork => switch_network(wallet, contract).await,
        Command::List => list(wallet, contract).await,
        Command::Mint { domain, record_url } => {
            run_flow(wallet, contract, domain, record_url, false).await
        }
        Command::SetRecord { domain, record_url } => {
            run_flow(wallet, contract, domain, record_url, true).await
        }
    }
}

fn read_only_client(wallet: &Wallet, contract: Address) -> Arc<NameServiceClient> {
    let registry = Arc::new(WalletRegistry::read_only(wallet.clone(), contract));
    NameServiceClient::new(wallet.gateway(), registry, NetworkProfile::polygon_mumbai())
}

async fn status(wallet: Wallet, contract: Address) -> Result<()> {
    let client = read_only_client(&wallet, contract);
    let mut events = client.subscribe_events();
    match client.detect_session().await? {
        NetworkState::Disconnected => {
            println!("no connected account; run `console connect`");
        }
        NetworkState::WrongNetwork { actual } => {
            println!("connected, but wallet is on chain {actual}; run `console switch-network`");
        }
        NetworkState::Ready { account, chain } => {
            println!("connected as {account} on chain {chain}");
        }
    }
    print_pending_notices(&mut events);
    Ok(())
}

async fn connect(wallet: Wallet, contract: Address) -> Result<()> {
    let client = read_only_client(&wallet, contract);
    let mut events = client.subscribe_events();
    match client.connect_wallet().await? {
        Some(account) => println!("connected as {account}"),
        None => println!("wallet connection did not complete"),
    }
    print_pending_notices(&mut events);
    Ok(())
}

async fn switch_network(wallet: Wallet, contract: Address) -> Result<()> {
    let client = read_only_client(&wallet, contract);
    client
        .switch_network()
        .await
        .context("network switch failed")?;
    println!("wallet moved to the expected test network");
    Ok(())
}

async fn list(wallet: Wallet, contract: Address) -> Result<()> {
    let client = read_only_client(&wallet, contract);
    let mints = client.refresh_mints().await?;
    print_mints(&mints);
    Ok(())
}

async fn run_flow(
    wallet: Wallet,
    contract: Address,
    domain: String,
    record_url: String,
    update: bool,
) -> Result<()> {
    let account = match wallet.accounts().await?.first().copied() {
        Some(account) => account,
        None => wallet
            .request_accounts()
            .await?
            .first()
            .copied()
            .context("wallet returned no accounts")?,
    };

    let gateway = wallet.gateway();
    let registry = Arc::new(WalletRegistry::new(wallet, contract, account));
    let client = NameServiceClient::new(gateway, registry, NetworkProfile::polygon_mumbai());
    client.start().await;
    let mut events = client.subscribe_events();

    if let NetworkState::WrongNetwork { actual } = client.detect_session().await? {
        bail!("wallet is on chain {actual}; run `console switch-network` first");
    }

    client.set_domain(&domain).await;
    client.set_record_input(&record_url).await;
    client.set_editing(update).await;

    let flow = if update {
        client.update_record().await
    } else {
        client.mint().await
    };
    if flow == Err(FlowError::Busy) {
        bail!("another transaction flow is already in progress");
    }

    report_flow_events(&mut events).await;
    client.shutdown().await;
    Ok(())
}

/// Print whatever the flow reported, waiting out the deferred refresh a
/// mint schedules. Returns once the list lands, a flow fails, or the
/// window elapses.
async fn report_flow_events(events: &mut broadcast::Receiver<ClientEvent>) {
    loop {
        match tokio::time::timeout(FLOW_REPORT_WINDOW, events.recv()).await {
            Ok(Ok(ClientEvent::Notice(notice))) => println!("! {notice}"),
            Ok(Ok(ClientEvent::MintsRefreshed(mints))) => {
                print_mints(&mints);
                return;
            }
            Ok(Ok(ClientEvent::FlowFailed { message, .. })) => {
                eprintln!("flow failed: {message}");
                return;
            }
            Ok(Ok(ClientEvent::SessionReset(chain))) => {
                println!("wallet moved to chain {chain}; session was reset");
                return;
            }
            Ok(Err(_)) | Err(_) => return,
        }
    }
}

fn print_pending_notices(events: &mut broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Notice(notice) = event {
            println!("! {notice}");
        }
    }
}

fn print_mints(mints: &[Mint]) {
    println!("{} minted name(s)", mints.len());
    for mint in mints {
        println!(
            "  [{}] {}{}  record={}  owner={}",
            mint.id, mint.name, TLD, mint.record, mint.owner
        );
    }
}
