//! Standalone airdrop contracts tied to a project token.

mod gateway;

pub use gateway::EthersAirdropGateway;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    backend::SyncJob,
    contracts::TxReceipt,
    error::{LaunchpadError, TxFailure, ValidationError},
    model::Project,
    outbox::{SyncOutbox, SyncStatus},
    provider::WalletAdapter,
    units::parse_units,
};

/// One recipient. `amount` is in human token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropEntry {
    pub address: Address,
    pub amount: String,
}

impl AirdropEntry {
    /// Pair up two columns of an upload, rejecting length mismatches and
    /// malformed addresses.
    pub fn from_columns(addresses: &[String], amounts: &[String]) -> Result<Vec<Self>, ValidationError> {
        if addresses.len() != amounts.len() {
            return Err(ValidationError::OutOfRange(format!(
                "{} addresses but {} amounts",
                addresses.len(),
                amounts.len()
            )));
        }
        addresses
            .iter()
            .zip(amounts)
            .map(|(a, amount)| {
                let address = a.trim().parse().map_err(|_| ValidationError::InvalidAddress(a.clone()))?;
                Ok(AirdropEntry { address, amount: amount.trim().to_string() })
            })
            .collect()
    }
}

fn unique(addresses: impl IntoIterator<Item = Address>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for a in addresses {
        if !seen.insert(a) {
            return Err(ValidationError::DuplicateAddress(a));
        }
    }
    Ok(())
}

/// Base-unit amounts for a batched `setAllocations`.
pub fn to_base_units(entries: &[AirdropEntry], decimals: u8) -> Result<Vec<(Address, U256)>, ValidationError> {
    if entries.is_empty() {
        return Err(ValidationError::Empty("allocations"));
    }
    unique(entries.iter().map(|e| e.address))?;
    entries
        .iter()
        .map(|e| {
            let amount = parse_units(&e.amount, decimals)?;
            if amount.is_zero() {
                return Err(ValidationError::InvalidAmount(e.amount.clone()));
            }
            Ok((e.address, amount))
        })
        .collect()
}

#[async_trait]
pub trait AirdropGateway: Send + Sync + 'static {
    async fn deploy(
        &self,
        chain_id: u64,
        owner: Address,
        token: Address,
        claim_start: u64,
        claim_end: u64,
    ) -> Result<TxReceipt, LaunchpadError>;

    async fn set_allocations(&self, chain_id: u64, airdrop: Address, amounts: &[(Address, U256)]) -> Result<TxReceipt, LaunchpadError>;

    async fn clear_allocations(&self, chain_id: u64, airdrop: Address, recipients: &[Address]) -> Result<TxReceipt, LaunchpadError>;

    async fn claim(&self, chain_id: u64, airdrop: Address) -> Result<TxReceipt, LaunchpadError>;
}

#[derive(Debug, Clone)]
pub struct AirdropDeployment {
    pub address: Address,
    pub tx_hash: H256,
    pub sync: SyncStatus,
}

#[derive(Debug, Clone)]
pub struct AirdropTx {
    pub tx_hash: H256,
    pub sync: Option<SyncStatus>,
}

pub struct AirdropOrchestrator<G> {
    gateway: G,
    wallet: Arc<WalletAdapter>,
    outbox: Arc<SyncOutbox>,
}

impl<G: AirdropGateway> AirdropOrchestrator<G> {
    pub fn new(gateway: G, wallet: Arc<WalletAdapter>, outbox: Arc<SyncOutbox>) -> Self {
        Self { gateway, wallet, outbox }
    }

    /// Deploy a new airdrop owned by the connected wallet.
    #[instrument(skip_all, fields(project = %project.id, reward = reward_id))]
    pub async fn deploy(
        &self,
        project: &Project,
        reward_id: &str,
        claim_start: DateTime<Utc>,
        claim_end: DateTime<Utc>,
    ) -> Result<AirdropDeployment, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        let token = project.token().ok_or_else(|| LaunchpadError::NoToken(project.id.clone()))?;
        if claim_end <= claim_start || claim_start.timestamp() < 0 {
            return Err(ValidationError::OutOfRange(format!("claim window {claim_start} .. {claim_end}")).into());
        }

        let receipt = self
            .gateway
            .deploy(project.chain_id, owner, token, claim_start.timestamp() as u64, claim_end.timestamp() as u64)
            .await?;
        let address = receipt.contract_address.ok_or_else(|| {
            LaunchpadError::Chain(TxFailure::Unknown { raw: "deployment receipt carries no contract address".into() })
        })?;
        info!(?address, tx_hash = ?receipt.tx_hash, "airdrop deployed");

        let sync = self
            .outbox
            .submit(SyncJob::AirdropDeployed {
                reward_id: reward_id.to_string(),
                contract_address: address,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(AirdropDeployment { address, tx_hash: receipt.tx_hash, sync })
    }

    /// One batched transaction for all entries.
    #[instrument(skip_all, fields(reward = reward_id, count = entries.len()))]
    pub async fn set_allocations(
        &self,
        project: &Project,
        reward_id: &str,
        airdrop: Address,
        entries: Vec<AirdropEntry>,
    ) -> Result<AirdropTx, LaunchpadError> {
        self.wallet.require_address()?;
        let amounts = to_base_units(&entries, project.decimals)?;
        let receipt = self.gateway.set_allocations(project.chain_id, airdrop, &amounts).await?;
        let sync = self
            .outbox
            .submit(SyncJob::AirdropAllocationsSet {
                reward_id: reward_id.to_string(),
                allocations: entries,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(AirdropTx { tx_hash: receipt.tx_hash, sync: Some(sync) })
    }

    #[instrument(skip_all, fields(reward = reward_id, count = addresses.len()))]
    pub async fn clear_allocations(
        &self,
        project: &Project,
        reward_id: &str,
        airdrop: Address,
        addresses: Vec<Address>,
    ) -> Result<AirdropTx, LaunchpadError> {
        self.wallet.require_address()?;
        if addresses.is_empty() {
            return Err(ValidationError::Empty("addresses").into());
        }
        unique(addresses.iter().copied())?;
        let receipt = self.gateway.clear_allocations(project.chain_id, airdrop, &addresses).await?;
        let sync = self
            .outbox
            .submit(SyncJob::AirdropAllocationsCleared {
                reward_id: reward_id.to_string(),
                addresses,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(AirdropTx { tx_hash: receipt.tx_hash, sync: Some(sync) })
    }

    /// End-user claim on the project's chain.
    #[instrument(skip_all, fields(project = %project.id, chain_id = project.chain_id))]
    pub async fn claim(&self, project: &Project, airdrop: Address) -> Result<AirdropTx, LaunchpadError> {
        self.wallet.require_address()?;
        let receipt = self.gateway.claim(project.chain_id, airdrop).await?;
        Ok(AirdropTx { tx_hash: receipt.tx_hash, sync: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Deploy { chain_id: u64, owner: Address, token: Address, start: u64, end: u64 },
        Set(Vec<(Address, U256)>),
        Clear(Vec<Address>),
        Claim { chain_id: u64, airdrop: Address },
    }

    #[derive(Default)]
    struct MockAirdrop {
        calls: Mutex<Vec<Call>>,
        no_address: bool,
    }

    impl MockAirdrop {
        fn record(&self, call: Call) -> Result<TxReceipt, LaunchpadError> {
            self.calls.lock().push(call);
            let mut r = testing::receipt(0xad);
            if !self.no_address {
                r.contract_address = Some(Address::repeat_byte(0xd0));
            }
            Ok(r)
        }
    }

    #[async_trait]
    impl AirdropGateway for Arc<MockAirdrop> {
        async fn deploy(&self, chain_id: u64, owner: Address, token: Address, start: u64, end: u64) -> Result<TxReceipt, LaunchpadError> {
            self.record(Call::Deploy { chain_id, owner, token, start, end })
        }
        async fn set_allocations(&self, _: u64, _: Address, amounts: &[(Address, U256)]) -> Result<TxReceipt, LaunchpadError> {
            self.record(Call::Set(amounts.to_vec()))
        }
        async fn clear_allocations(&self, _: u64, _: Address, recipients: &[Address]) -> Result<TxReceipt, LaunchpadError> {
            self.record(Call::Clear(recipients.to_vec()))
        }
        async fn claim(&self, chain_id: u64, airdrop: Address) -> Result<TxReceipt, LaunchpadError> {
            self.record(Call::Claim { chain_id, airdrop })
        }
    }

    fn orchestrator(mock: Arc<MockAirdrop>) -> (AirdropOrchestrator<Arc<MockAirdrop>>, Arc<testing::RecordingBackend>) {
        let (outbox, backend) = testing::outbox();
        (AirdropOrchestrator::new(mock, testing::wallet(true), outbox), backend)
    }

    fn entry(byte: u8, amount: &str) -> AirdropEntry {
        AirdropEntry { address: Address::repeat_byte(byte), amount: amount.into() }
    }

    #[tokio::test]
    async fn deploy_passes_owner_token_and_window() {
        let mock = Arc::new(MockAirdrop::default());
        let (orch, backend) = orchestrator(mock.clone());
        let project = testing::project();
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let out = orch.deploy(&project, "r1", start, end).await.unwrap();
        assert_eq!(out.address, Address::repeat_byte(0xd0));
        let owner = testing::wallet(true).address().unwrap();
        assert_eq!(
            *mock.calls.lock(),
            vec![Call::Deploy {
                chain_id: 56,
                owner,
                token: Address::repeat_byte(0x70),
                start: start.timestamp() as u64,
                end: end.timestamp() as u64,
            }]
        );
        assert!(matches!(&backend.jobs.lock()[0], SyncJob::AirdropDeployed { reward_id, .. } if reward_id == "r1"));

        assert!(matches!(orch.deploy(&project, "r1", end, start).await, Err(LaunchpadError::Validation(_))));
    }

    #[tokio::test]
    async fn deploy_without_contract_address_is_an_error() {
        let mock = Arc::new(MockAirdrop { no_address: true, ..Default::default() });
        let (orch, backend) = orchestrator(mock);
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert!(orch.deploy(&testing::project(), "r1", start, end).await.is_err());
        assert!(backend.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn set_allocations_is_one_batched_call() {
        let mock = Arc::new(MockAirdrop::default());
        let (orch, backend) = orchestrator(mock.clone());
        let entries = vec![entry(1, "10"), entry(2, "0.5")];
        orch.set_allocations(&testing::project(), "r1", Address::repeat_byte(0xd0), entries.clone()).await.unwrap();

        assert_eq!(
            *mock.calls.lock(),
            vec![Call::Set(vec![
                (Address::repeat_byte(1), U256::exp10(19)),
                (Address::repeat_byte(2), U256::exp10(17) * 5),
            ])]
        );
        assert!(matches!(&backend.jobs.lock()[0], SyncJob::AirdropAllocationsSet { allocations, .. } if *allocations == entries));
    }

    #[tokio::test]
    async fn invalid_lists_never_reach_the_chain() {
        let mock = Arc::new(MockAirdrop::default());
        let (orch, _) = orchestrator(mock.clone());
        let project = testing::project();
        let at = Address::repeat_byte(0xd0);

        for bad in [vec![], vec![entry(1, "1"), entry(1, "2")], vec![entry(1, "0")], vec![entry(1, "-1")]] {
            assert!(matches!(
                orch.set_allocations(&project, "r1", at, bad).await,
                Err(LaunchpadError::Validation(_))
            ));
        }
        assert!(orch.clear_allocations(&project, "r1", at, vec![]).await.is_err());
        let dup = vec![Address::repeat_byte(1), Address::repeat_byte(1)];
        assert!(orch.clear_allocations(&project, "r1", at, dup).await.is_err());
        assert!(mock.calls.lock().is_empty());
    }

    #[test]
    fn columns_must_line_up() {
        let addrs = vec!["0x1111111111111111111111111111111111111111".to_string()];
        assert!(AirdropEntry::from_columns(&addrs, &[]).is_err());
        let ok = AirdropEntry::from_columns(&addrs, &["5".to_string()]).unwrap();
        assert_eq!(ok, vec![entry(0x11, "5")]);
        assert!(AirdropEntry::from_columns(&["nope".to_string()], &["5".to_string()]).is_err());
    }

    #[tokio::test]
    async fn claim_targets_project_chain() {
        let mock = Arc::new(MockAirdrop::default());
        let (orch, backend) = orchestrator(mock.clone());
        let out = orch.claim(&testing::project(), Address::repeat_byte(0xd0)).await.unwrap();
        assert!(out.sync.is_none());
        assert_eq!(*mock.calls.lock(), vec![Call::Claim { chain_id: 56, airdrop: Address::repeat_byte(0xd0) }]);
        assert!(backend.jobs.lock().is_empty());

        let (outbox, _) = testing::outbox();
        let offline = AirdropOrchestrator::new(mock, testing::wallet(false), outbox);
        assert!(matches!(
            offline.claim(&testing::project(), Address::repeat_byte(0xd0)).await,
            Err(LaunchpadError::WalletNotConnected)
        ));
    }
}
