//! Client core for the music name service.
//!
//! Owns the session state, the network guard and the two transaction flows
//! (mint and record update). All durable state lives in the external
//! registry contract; everything here is orchestration over the wallet
//! gateway and the registry proxy.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{utils::parse_ether, Address, U256};
use anyhow::{Context, Result};
use futures::future::join_all;
use registry::NameRegistry;
use shared::{
    domain::{ChainId, Mint, NetworkState},
    error::{ErrorCode, Notice},
    protocol::ChainDescriptor,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};
use wallet_integration::{Wallet, WalletError, WalletGateway};

/// Top-level suffix every registered name lives under.
pub const TLD: &str = ".mus";
/// Pasted record links must start with this prefix to be accepted.
pub const TRACK_URL_PREFIX: &str = "https://open.spotify.com/track/";
/// Names shorter than this are rejected before any chain interaction.
pub const MIN_NAME_LEN: usize = 3;

const MINT_REFRESH_DELAY: Duration = Duration::from_secs(2);
const MINT_REFRESH_ATTEMPTS: u32 = 3;
const EVENT_CAPACITY: usize = 64;

/// Strip the streaming prefix and any trailing query string from a pasted
/// track URL, leaving the bare track id. `None` when the input is not a
/// track link.
pub fn normalize_track_url(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix(TRACK_URL_PREFIX)?;
    let id = rest.split('?').next().unwrap_or(rest);
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Length-tiered price in native units. The contract enforces the same
/// table; this is what the register call sends along.
pub fn price_label(name: &str) -> &'static str {
    match name.chars().count() {
        3 => "0.5",
        4 => "0.3",
        _ => "0.1",
    }
}

pub fn mint_price(name: &str) -> Result<U256> {
    parse_ether(price_label(name)).context("price table produced an unparseable amount")
}

/// Transient per-session state. Reset wholesale when the wallet changes
/// chains; nothing in here survives outside this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub account: Option<Address>,
    pub chain: Option<ChainId>,
    pub domain: String,
    pub record: String,
    pub editing: bool,
    pub busy: bool,
    pub mints: Vec<Mint>,
}

/// The network the client expects the wallet to be on, with the full
/// parameter set needed to register it with a wallet that lacks it.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub expected: ChainDescriptor,
}

impl NetworkProfile {
    pub fn polygon_mumbai() -> Self {
        Self {
            expected: ChainDescriptor::polygon_mumbai(),
        }
    }

    pub fn expected_chain(&self) -> ChainId {
        self.expected.chain_id
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("another transaction flow is already in progress")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowContext {
    Mint,
    Update,
    Refresh,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// User-visible notification; the alert surface of a front end.
    Notice(Notice),
    /// The wallet moved chains and the session was discarded.
    SessionReset(ChainId),
    MintsRefreshed(Vec<Mint>),
    /// A flow died on an unexpected wallet/contract error. No retry is
    /// attempted; the user re-triggers manually.
    FlowFailed {
        context: FlowContext,
        message: String,
    },
}

fn derive_network_state(state: &SessionState, expected: ChainId) -> NetworkState {
    let Some(account) = state.account else {
        return NetworkState::Disconnected;
    };
    match state.chain {
        Some(chain) if chain == expected => NetworkState::Ready { account, chain },
        Some(chain) => NetworkState::WrongNetwork { actual: chain },
        None => NetworkState::Disconnected,
    }
}

fn is_unrecognized_chain(err: &anyhow::Error) -> bool {
    err.downcast_ref::<WalletError>()
        .is_some_and(WalletError::is_unrecognized_chain)
}

fn wallet_notice(err: &anyhow::Error) -> Notice {
    match err.downcast_ref::<WalletError>() {
        Some(unavailable @ WalletError::Unavailable) => {
            Notice::wallet_unavailable(unavailable.to_string())
        }
        _ => Notice::new(ErrorCode::Gateway, format!("wallet request failed: {err}")),
    }
}

pub struct NameServiceClient {
    wallet: Wallet,
    registry: Arc<dyn NameRegistry>,
    profile: NetworkProfile,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<ClientEvent>,
    chain_task: Mutex<Option<JoinHandle<()>>>,
}

impl NameServiceClient {
    pub fn new(
        gateway: Arc<dyn WalletGateway>,
        registry: Arc<dyn NameRegistry>,
        profile: NetworkProfile,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            wallet: Wallet::new(gateway),
            registry,
            profile,
            inner: Mutex::new(SessionState::default()),
            events,
            chain_task: Mutex::new(None),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Register the chain-change listener. A chain change discards all
    /// in-memory session state, the moral equivalent of the page reload the
    /// wallet-facing front ends do; form state is intentionally not
    /// preserved across networks.
    pub async fn start(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let mut changes = self.wallet.subscribe_chain_changes();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(chain) => client.handle_chain_changed(chain).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.chain_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.chain_task.lock().await.take() {
            task.abort();
        }
    }

    async fn handle_chain_changed(&self, chain: ChainId) {
        info!(%chain, "wallet moved networks; discarding session state");
        {
            let mut state = self.inner.lock().await;
            *state = SessionState::default();
        }
        let _ = self.events.send(ClientEvent::SessionReset(chain));
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    pub async fn set_domain(&self, domain: impl Into<String>) {
        self.inner.lock().await.domain = domain.into();
    }

    pub async fn set_record_input(&self, record: impl Into<String>) {
        self.inner.lock().await.record = record.into();
    }

    pub async fn set_editing(&self, editing: bool) {
        self.inner.lock().await.editing = editing;
    }

    fn notify(&self, notice: Notice) {
        let _ = self.events.send(ClientEvent::Notice(notice));
    }

    /// Non-prompting discovery of an already-authorized account and the
    /// active chain. Never pops the wallet UI.
    pub async fn detect_session(&self) -> Result<NetworkState> {
        let accounts = match self.wallet.accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("wallet discovery failed: {err:#}");
                self.notify(wallet_notice(&err));
                return Ok(NetworkState::Disconnected);
            }
        };
        let chain = self.wallet.chain_id().await?;

        let mut state = self.inner.lock().await;
        state.account = accounts.first().copied();
        state.chain = Some(chain);
        Ok(derive_network_state(&state, self.profile.expected_chain()))
    }

    /// Prompting connect (`eth_requestAccounts`). Failures, including a
    /// missing wallet, surface as a notice; the flow simply ends.
    pub async fn connect_wallet(&self) -> Result<Option<Address>> {
        let accounts = match self.wallet.request_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("wallet connect failed: {err:#}");
                self.notify(wallet_notice(&err));
                return Ok(None);
            }
        };
        let account = accounts.first().copied();
        let chain = self.wallet.chain_id().await.ok();

        let mut state = self.inner.lock().await;
        state.account = account;
        if chain.is_some() {
            state.chain = chain;
        }
        if let Some(account) = account {
            info!(%account, "wallet connected");
        }
        Ok(account)
    }

    pub async fn network_state(&self) -> NetworkState {
        let state = self.inner.lock().await;
        derive_network_state(&state, self.profile.expected_chain())
    }

    /// Ask the wallet to move to the expected test network. A wallet that
    /// does not know the chain rejects with code 4902; the chain parameters
    /// are then registered and the switch retried. The chain-change
    /// listener picks up the result, so session state is not touched here.
    pub async fn switch_network(&self) -> Result<()> {
        let expected = self.profile.expected_chain();
        match self.wallet.switch_chain(expected).await {
            Ok(()) => Ok(()),
            Err(err) if is_unrecognized_chain(&err) => {
                info!(chain = %expected, "wallet lacks the target chain; registering parameters");
                self.wallet
                    .add_chain(&self.profile.expected)
                    .await
                    .context("failed to register chain parameters with the wallet")?;
                self.wallet.switch_chain(expected).await
            }
            Err(err) => Err(err),
        }
    }

    async fn begin_flow(&self) -> Result<(), FlowError> {
        let mut state = self.inner.lock().await;
        if state.busy {
            return Err(FlowError::Busy);
        }
        state.busy = true;
        Ok(())
    }

    async fn end_flow(&self) {
        self.inner.lock().await.busy = false;
    }

    /// Normalize the pasted record URL and check the name, notifying and
    /// resetting fields on failure. `None` means validation already stopped
    /// the flow; no chain call has been made at that point.
    async fn validated_form(&self) -> Option<(String, String)> {
        let (domain, raw_record) = {
            let state = self.inner.lock().await;
            (state.domain.clone(), state.record.clone())
        };

        let Some(record) = normalize_track_url(&raw_record) else {
            self.inner.lock().await.record.clear();
            self.notify(Notice::validation("Record must be a valid spotify url!"));
            return None;
        };
        // Keep the bare id so the form shows what will actually be stored.
        self.inner.lock().await.record = record.clone();

        if domain.is_empty() {
            return None;
        }
        if domain.chars().count() < MIN_NAME_LEN {
            self.notify(Notice::validation(
                "Domain must be at least 3 characters long!",
            ));
            return None;
        }

        Some((domain, record))
    }

    async fn clear_form(&self) {
        let mut state = self.inner.lock().await;
        state.domain.clear();
        state.record.clear();
    }

    /// Two-step mint: `register` must reach finality successfully before
    /// the record is attached. The busy flag is authoritative: a second
    /// flow started while one is in flight is rejected outright rather than
    /// trusting the front end to disable its controls.
    pub async fn mint(self: &Arc<Self>) -> Result<(), FlowError> {
        self.begin_flow().await?;
        let result = self.mint_inner().await;
        self.end_flow().await;
        if let Err(err) = result {
            warn!("mint flow failed: {err:#}");
            let _ = self.events.send(ClientEvent::FlowFailed {
                context: FlowContext::Mint,
                message: format!("{err:#}"),
            });
        }
        Ok(())
    }

    async fn mint_inner(self: &Arc<Self>) -> Result<()> {
        let Some((domain, record)) = self.validated_form().await else {
            return Ok(());
        };

        let price = mint_price(&domain)?;
        info!(%domain, price = price_label(&domain), "minting name");

        let registered = self
            .registry
            .register(&domain, price)
            .await
            .context("register transaction failed")?;
        if !registered.succeeded() {
            self.notify(Notice::tx_failed("Transaction failed! Try again."));
            return Ok(());
        }
        info!(hash = %registered.hash, "name registered; attaching record");

        let recorded = self
            .registry
            .set_record(&domain, &record)
            .await
            .context("setRecord transaction failed")?;
        if !recorded.succeeded() {
            self.notify(Notice::tx_failed("Record transaction failed! Try again."));
            return Ok(());
        }
        info!(hash = %recorded.hash, "record set");

        self.clear_form().await;
        self.spawn_delayed_refresh(domain);
        Ok(())
    }

    /// One-step update of an existing name's record, then a synchronous
    /// list refresh.
    pub async fn update_record(self: &Arc<Self>) -> Result<(), FlowError> {
        self.begin_flow().await?;
        let result = self.update_inner().await;
        self.end_flow().await;
        if let Err(err) = result {
            warn!("update flow failed: {err:#}");
            let _ = self.events.send(ClientEvent::FlowFailed {
                context: FlowContext::Update,
                message: format!("{err:#}"),
            });
        }
        Ok(())
    }

    async fn update_inner(&self) -> Result<()> {
        let Some((domain, record)) = self.validated_form().await else {
            return Ok(());
        };

        info!(%domain, "updating record");
        let outcome = self
            .registry
            .set_record(&domain, &record)
            .await
            .context("setRecord transaction failed")?;
        if !outcome.succeeded() {
            self.notify(Notice::tx_failed("Transaction failed! Try again."));
            return Ok(());
        }

        self.refresh_mints().await?;
        self.clear_form().await;
        Ok(())
    }

    /// Fetch every registered name, then fan out the per-name record and
    /// owner lookups concurrently; the list is published only once all
    /// lookups settle. Ids are the index within this fetch and are not
    /// comparable across fetches.
    pub async fn refresh_mints(&self) -> Result<Vec<Mint>> {
        let names = self
            .registry
            .all_names()
            .await
            .context("getAllNames query failed")?;

        let lookups = names.into_iter().map(|name| {
            let registry = Arc::clone(&self.registry);
            async move {
                let (record, owner) =
                    tokio::try_join!(registry.record_of(&name), registry.owner_of(&name))?;
                anyhow::Ok((name, record, owner))
            }
        });

        let mut mints = Vec::new();
        for (id, lookup) in join_all(lookups).await.into_iter().enumerate() {
            let (name, record, owner) = lookup?;
            mints.push(Mint {
                id: id as u64,
                name,
                record,
                owner,
            });
        }

        self.inner.lock().await.mints = mints.clone();
        let _ = self.events.send(ClientEvent::MintsRefreshed(mints.clone()));
        Ok(mints)
    }

    /// The ledger usually needs a moment to index a fresh mint, so the
    /// first refresh is deferred; if the name has still not appeared the
    /// poll repeats a few times with a widening gap.
    fn spawn_delayed_refresh(self: &Arc<Self>, minted: String) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut delay = MINT_REFRESH_DELAY;
            for _ in 0..MINT_REFRESH_ATTEMPTS {
                tokio::time::sleep(delay).await;
                match client.refresh_mints().await {
                    Ok(mints) if mints.iter().any(|mint| mint.name == minted) => return,
                    Ok(_) => delay *= 2,
                    Err(err) => {
                        warn!("deferred mint-list refresh failed: {err:#}");
                        let _ = client.events.send(ClientEvent::FlowFailed {
                            context: FlowContext::Refresh,
                            message: format!("{err:#}"),
                        });
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
