//! Presale lifecycle: activation, contribution, claim, refund, sweep.
//!
//! The on-chain snapshot is the source of truth for timing and eligibility.
//! Contribution info is always read as one unit (four views) and refetched
//! after every state-changing call.

mod gateway;

pub use gateway::EthersPresaleGateway;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    backend::SyncJob,
    config::PresaleDefaults,
    contracts::TxReceipt,
    error::{LaunchpadError, ValidationError},
    model::{Presale, Project},
    outbox::{SyncOutbox, SyncStatus},
    provider::{ChainRegistry, WalletAdapter},
    units::{compute_progress, format_units, parse_ether, to_f64},
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// `PresaleSC` as read from `presales(id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleSnapshot {
    pub start_time: u64,
    pub end_time: u64,
    pub claim_time: u64,
    pub claim_delay: u64,
    pub finalized: bool,
    pub hard_cap: U256,
    pub total_raised: U256,
    pub tokens_needed: U256,
    pub initial_release_bps: u64,
    pub cliff_duration: u64,
    pub vesting_duration: u64,
    pub sweep_duration: u64,
}

/// Formatted per-user state for one presale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionInfo {
    pub claimable: String,
    pub contribution: String,
    pub claimed: String,
    pub refunded: bool,
}

/// Arguments of `activatePresale`, already in contract units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationParams {
    pub token: Address,
    pub whitelist: Address,
    pub hard_cap: U256,
    pub price: U256,
    pub max_contribution: U256,
    pub start_time: u64,
    pub duration: u64,
    pub whitelist_duration: u64,
    pub claim_time: u64,
    pub sweep_duration: u64,
}

impl ActivationParams {
    pub fn from_presale(token: Address, presale: &Presale, defaults: &PresaleDefaults) -> Result<Self, LaunchpadError> {
        let start = presale.start_date.timestamp();
        if start < 0 {
            return Err(ValidationError::OutOfRange(format!("start date {}", presale.start_date)).into());
        }
        if presale.duration_days == 0 {
            return Err(ValidationError::MissingField("durationDays").into());
        }
        let whitelist_duration = match (presale.whitelist_contract, presale.whitelist_duration_days) {
            (None, _) => 0,
            (Some(_), Some(days)) => u64::from(days) * SECONDS_PER_DAY,
            (Some(_), None) => defaults.whitelist_duration.as_secs(),
        };
        Ok(Self {
            token,
            whitelist: presale.whitelist_contract.unwrap_or_default(),
            hard_cap: parse_ether(&presale.hardcap)?,
            price: parse_ether(&presale.price)?,
            max_contribution: parse_ether(&presale.max_contribution)?,
            start_time: start as u64,
            duration: u64::from(presale.duration_days) * SECONDS_PER_DAY,
            whitelist_duration,
            claim_time: defaults.claim_delay.as_secs(),
            sweep_duration: defaults.sweep_duration.as_secs(),
        })
    }
}

/// Claim opens only when the raise equals the hardcap exactly.
pub fn is_claim_available(snapshot: &PresaleSnapshot) -> bool {
    snapshot.hard_cap == snapshot.total_raised
}

/// Not finalized and `end_time` (seconds) has passed at `now_ms`.
pub fn is_refund_available(snapshot: &PresaleSnapshot, now_ms: i64) -> bool {
    let end_ms = i128::from(snapshot.end_time) * 1000;
    !snapshot.finalized && end_ms <= i128::from(now_ms)
}

/// Percent of hardcap raised.
pub fn progress(snapshot: &PresaleSnapshot, decimals: u8) -> f64 {
    compute_progress(to_f64(snapshot.total_raised, decimals), to_f64(snapshot.hard_cap, decimals))
}

/// Raw values behind [`ContributionInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawContribution {
    pub claimable: U256,
    pub contribution: U256,
    pub claimed: U256,
    pub refunded: bool,
}

/// Chain side of the presale flow.
#[async_trait]
pub trait PresaleGateway: Send + Sync + 'static {
    async fn activate(&self, chain_id: u64, contract: Address, params: &ActivationParams) -> Result<TxReceipt, LaunchpadError>;
    async fn presale_count(&self, chain_id: u64, contract: Address) -> Result<u64, LaunchpadError>;
    async fn snapshot(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<PresaleSnapshot, LaunchpadError>;
    async fn start_time(&self, chain_id: u64, contract: Address) -> Result<u64, LaunchpadError>;
    async fn contribute(&self, chain_id: u64, contract: Address, user: Address, value: U256) -> Result<TxReceipt, LaunchpadError>;

    async fn claimable_tokens(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError>;
    async fn contribution(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError>;
    async fn claimed_tokens(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError>;
    async fn has_been_refunded(&self, chain_id: u64, contract: Address, user: Address) -> Result<bool, LaunchpadError>;

    async fn claim(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError>;
    async fn refund(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError>;
    async fn sweep(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError>;
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub tx_hash: H256,
    pub presale_scid: u64,
    pub sync: SyncStatus,
}

/// Result of a state-changing presale call.
#[derive(Debug, Clone)]
pub struct PresaleTx {
    pub tx_hash: H256,
    /// `None` when the call has no backend side.
    pub sync: Option<SyncStatus>,
    /// `None` when the refetch failed; the transaction itself succeeded.
    pub refreshed: Option<ContributionInfo>,
}

pub struct PresaleOrchestrator<G> {
    gateway: G,
    registry: Arc<ChainRegistry>,
    wallet: Arc<WalletAdapter>,
    outbox: Arc<SyncOutbox>,
    defaults: PresaleDefaults,
    clock: fn() -> i64,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl<G: PresaleGateway> PresaleOrchestrator<G> {
    pub fn new(
        gateway: G,
        registry: Arc<ChainRegistry>,
        wallet: Arc<WalletAdapter>,
        outbox: Arc<SyncOutbox>,
        defaults: PresaleDefaults,
    ) -> Self {
        Self { gateway, registry, wallet, outbox, defaults, clock: now_ms }
    }

    /// Override wall-clock milliseconds.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    fn contract(&self, chain_id: u64) -> Result<Address, LaunchpadError> {
        self.registry
            .get(chain_id)?
            .presale_contract
            .ok_or(LaunchpadError::MissingContract { name: "presale", chain_id })
    }

    fn stablecoin_decimals(&self, chain_id: u64) -> Result<u8, LaunchpadError> {
        Ok(self.registry.get(chain_id)?.stablecoin.decimals)
    }

    fn scid(presale: &Presale) -> Result<u64, LaunchpadError> {
        presale.presale_scid.ok_or(LaunchpadError::NotActivated)
    }

    /// Owner action. Stores the new on-chain id through the outbox.
    #[instrument(skip_all, fields(presale = %presale.id, chain_id = project.chain_id))]
    pub async fn activate(&self, project: &Project, presale: &Presale) -> Result<Activation, LaunchpadError> {
        self.wallet.require_address()?;
        if presale.presale_scid.is_some() {
            return Err(LaunchpadError::InvalidState("presale is already activated".into()));
        }
        let token = project.token().ok_or_else(|| LaunchpadError::NoToken(project.id.clone()))?;
        let params = ActivationParams::from_presale(token, presale, &self.defaults)?;
        let contract = self.contract(project.chain_id)?;

        let receipt = self.gateway.activate(project.chain_id, contract, &params).await?;
        let presale_scid = self.gateway.presale_count(project.chain_id, contract).await?;
        info!(presale_scid, tx_hash = ?receipt.tx_hash, "presale activated");

        let sync = self
            .outbox
            .submit(SyncJob::PresaleActivated {
                presale_id: presale.id.clone(),
                presale_scid,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(Activation { tx_hash: receipt.tx_hash, presale_scid, sync })
    }

    /// Contribute `amount` of the native currency.
    #[instrument(skip_all, fields(presale = %presale.id, chain_id = project.chain_id, amount))]
    pub async fn contribute(&self, project: &Project, presale: &Presale, amount: &str) -> Result<PresaleTx, LaunchpadError> {
        let user = self.wallet.require_address()?;
        let value = parse_ether(amount)?;
        if value.is_zero() {
            return Err(ValidationError::InvalidAmount(amount.into()).into());
        }
        if value > parse_ether(&presale.max_contribution)? {
            return Err(ValidationError::ExceedsMax {
                amount: amount.into(),
                max: presale.max_contribution.clone(),
            }
            .into());
        }
        let contract = self.contract(project.chain_id)?;

        // Advisory only: the contract enforces the window.
        let now_secs = (self.clock)() / 1000;
        match self.gateway.start_time(project.chain_id, contract).await {
            Ok(start) if i128::from(start) > i128::from(now_secs) => {
                warn!(start, now = now_secs, "presale does not appear to have started yet");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read presale start time"),
        }

        let receipt = self.gateway.contribute(project.chain_id, contract, user, value).await?;
        let sync = self
            .outbox
            .submit(SyncJob::ContributionRecorded {
                presale_id: presale.id.clone(),
                project_id: project.id.clone(),
                price: presale.price.clone(),
                count: to_f64(value, 18),
                transaction_hash: receipt.tx_hash,
            })
            .await;
        let refreshed = self.refetch(project, presale, user).await;
        Ok(PresaleTx { tx_hash: receipt.tx_hash, sync: Some(sync), refreshed })
    }

    /// All four per-user views, read concurrently and formatted together.
    pub async fn contribution_info(
        &self,
        project: &Project,
        presale: &Presale,
        user: Address,
    ) -> Result<ContributionInfo, LaunchpadError> {
        let chain_id = project.chain_id;
        let contract = self.contract(chain_id)?;
        let (claimable, contribution, claimed, refunded) = tokio::try_join!(
            self.gateway.claimable_tokens(chain_id, contract, user),
            self.gateway.contribution(chain_id, contract, user),
            self.gateway.claimed_tokens(chain_id, contract, user),
            self.gateway.has_been_refunded(chain_id, contract, user),
        )?;
        let contribution_decimals = presale.contribution_decimals(project.decimals, self.stablecoin_decimals(chain_id)?);
        Ok(ContributionInfo {
            claimable: format_units(claimable, project.decimals),
            contribution: format_units(contribution, contribution_decimals),
            claimed: format_units(claimed, project.decimals),
            refunded,
        })
    }

    async fn refetch(&self, project: &Project, presale: &Presale, user: Address) -> Option<ContributionInfo> {
        match self.contribution_info(project, presale, user).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "contribution refetch failed");
                None
            }
        }
    }

    pub async fn snapshot(&self, project: &Project, presale: &Presale) -> Result<PresaleSnapshot, LaunchpadError> {
        let contract = self.contract(project.chain_id)?;
        self.gateway.snapshot(project.chain_id, contract, Self::scid(presale)?).await
    }

    #[instrument(skip_all, fields(presale = %presale.id, chain_id = project.chain_id))]
    pub async fn claim(&self, project: &Project, presale: &Presale) -> Result<PresaleTx, LaunchpadError> {
        let user = self.wallet.require_address()?;
        let scid = Self::scid(presale)?;
        let snapshot = self.snapshot(project, presale).await?;
        if !is_claim_available(&snapshot) {
            return Err(LaunchpadError::ClaimUnavailable);
        }
        let receipt = self.gateway.claim(project.chain_id, self.contract(project.chain_id)?, scid).await?;
        let refreshed = self.refetch(project, presale, user).await;
        Ok(PresaleTx { tx_hash: receipt.tx_hash, sync: None, refreshed })
    }

    #[instrument(skip_all, fields(presale = %presale.id, chain_id = project.chain_id))]
    pub async fn refund(&self, project: &Project, presale: &Presale) -> Result<PresaleTx, LaunchpadError> {
        let user = self.wallet.require_address()?;
        let scid = Self::scid(presale)?;
        let snapshot = self.snapshot(project, presale).await?;
        if !is_refund_available(&snapshot, (self.clock)()) {
            return Err(LaunchpadError::RefundUnavailable);
        }
        let receipt = self.gateway.refund(project.chain_id, self.contract(project.chain_id)?, scid).await?;
        let refreshed = self.refetch(project, presale, user).await;
        Ok(PresaleTx { tx_hash: receipt.tx_hash, sync: None, refreshed })
    }

    /// Owner action: sweep unclaimed tokens once.
    #[instrument(skip_all, fields(presale = %presale.id, chain_id = project.chain_id))]
    pub async fn sweep(&self, project: &Project, presale: &Presale) -> Result<PresaleTx, LaunchpadError> {
        self.wallet.require_address()?;
        if presale.is_withdrawn {
            return Err(LaunchpadError::AlreadyWithdrawn);
        }
        let scid = Self::scid(presale)?;
        let receipt = self.gateway.sweep(project.chain_id, self.contract(project.chain_id)?, scid).await?;
        let sync = self
            .outbox
            .submit(SyncJob::PresaleWithdrawn { presale_id: presale.id.clone(), transaction_hash: receipt.tx_hash })
            .await;
        Ok(PresaleTx { tx_hash: receipt.tx_hash, sync: Some(sync), refreshed: None })
    }
}
