//! Allocation lockers: beneficiary lists, finalization, unlock schedules.

pub mod beneficiaries;
mod locker;
pub mod schedule;

pub use beneficiaries::{parse_bulk, BeneficiaryForm, BeneficiaryRow};
pub use locker::{EthersLockerGateway, LockerGateway};

use std::sync::Arc;

use ethers::types::{Address, H256};
use tracing::{info, instrument, warn};

use crate::{
    backend::SyncJob,
    batch::BatchResult,
    error::LaunchpadError,
    model::{Allocation, Project},
    outbox::{SyncOutbox, SyncStatus},
    provider::WalletAdapter,
};

use beneficiaries::{to_absolute, validate_allocation_supply};

#[derive(Debug, Clone)]
pub struct LockerTx {
    pub tx_hash: H256,
    pub sync: SyncStatus,
}

pub struct LockerOrchestrator<G> {
    gateway: G,
    wallet: Arc<WalletAdapter>,
    outbox: Arc<SyncOutbox>,
}

impl<G: LockerGateway> LockerOrchestrator<G> {
    pub fn new(gateway: G, wallet: Arc<WalletAdapter>, outbox: Arc<SyncOutbox>) -> Self {
        Self { gateway, wallet, outbox }
    }

    fn editable_locker(allocation: &Allocation) -> Result<Address, LaunchpadError> {
        if allocation.is_finalized {
            return Err(LaunchpadError::AllocationFinalized(allocation.id.clone()));
        }
        allocation.locker().ok_or_else(|| LaunchpadError::NoLocker(allocation.id.clone()))
    }

    /// Backend-only: the allocation table of a project.
    #[instrument(skip_all, fields(project = %project.id))]
    pub async fn save_allocations(&self, project: &Project, allocations: Vec<Allocation>) -> Result<SyncStatus, LaunchpadError> {
        validate_allocation_supply(&allocations)?;
        Ok(self
            .outbox
            .submit(SyncJob::AllocationsSaved { project_id: project.id.clone(), allocations })
            .await)
    }

    #[instrument(skip_all, fields(allocation = %allocation.id))]
    pub async fn add_beneficiaries(
        &self,
        project: &Project,
        allocation: &Allocation,
        form: &BeneficiaryForm,
    ) -> Result<LockerTx, LaunchpadError> {
        self.wallet.require_address()?;
        let locker = Self::editable_locker(allocation)?;
        let entries = form.validate()?;
        let amounts = to_absolute(&entries, &project.total_supply, allocation.supply, project.decimals)?;

        let receipt = self.gateway.set_beneficiaries(project.chain_id, locker, &amounts).await?;
        info!(count = entries.len(), tx_hash = ?receipt.tx_hash, "beneficiaries set");
        let sync = self
            .outbox
            .submit(SyncJob::BeneficiariesAdded {
                allocation_id: allocation.id.clone(),
                beneficiaries: entries,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(LockerTx { tx_hash: receipt.tx_hash, sync })
    }

    /// Checked rows are removed; the rest are resubmitted as the full list.
    #[instrument(skip_all, fields(allocation = %allocation.id))]
    pub async fn remove_beneficiaries(
        &self,
        project: &Project,
        allocation: &Allocation,
        form: &BeneficiaryForm,
    ) -> Result<LockerTx, LaunchpadError> {
        self.wallet.require_address()?;
        let locker = Self::editable_locker(allocation)?;
        let (remaining, removed_ids) = form.split_checked()?;
        let amounts = to_absolute(&remaining, &project.total_supply, allocation.supply, project.decimals)?;

        let receipt = self.gateway.reset_beneficiaries(project.chain_id, locker, &amounts).await?;
        info!(removed = removed_ids.len(), tx_hash = ?receipt.tx_hash, "beneficiaries reset");
        let sync = self
            .outbox
            .submit(SyncJob::BeneficiariesReset {
                allocation_id: allocation.id.clone(),
                beneficiaries: remaining,
                removed_ids,
                transaction_hash: receipt.tx_hash,
            })
            .await;
        Ok(LockerTx { tx_hash: receipt.tx_hash, sync })
    }

    /// Irreversible. The caller must treat the allocation as finalized from
    /// here on, whatever the sync status.
    #[instrument(skip_all, fields(allocation = %allocation.id))]
    pub async fn finalize(&self, project: &Project, allocation: &Allocation) -> Result<LockerTx, LaunchpadError> {
        self.wallet.require_address()?;
        let locker = Self::editable_locker(allocation)?;
        if self.gateway.is_finalized(project.chain_id, locker).await? {
            return Err(LaunchpadError::AllocationFinalized(allocation.id.clone()));
        }
        let receipt = self.gateway.finalize(project.chain_id, locker).await?;
        let sync = self
            .outbox
            .submit(SyncJob::LockerFinalized { allocation_id: allocation.id.clone(), transaction_hash: receipt.tx_hash })
            .await;
        Ok(LockerTx { tx_hash: receipt.tx_hash, sync })
    }

    /// Fund every vested locker from the connected wallet, one transfer per
    /// allocation. Stops at the first failure; later allocations are skipped.
    #[instrument(skip_all, fields(project = %project.id))]
    pub async fn transfer_to_vesting(&self, project: &Project) -> Result<BatchResult<String>, LaunchpadError> {
        self.wallet.require_address()?;
        let token = project.token().ok_or_else(|| LaunchpadError::NoToken(project.id.clone()))?;
        let total_supply = project.total_supply_units()?;

        let targets: Vec<&Allocation> = project.allocations.iter().filter(|a| a.is_vested_locker()).collect();
        let mut result = BatchResult::new();
        let mut pending = targets.into_iter();
        while let Some(allocation) = pending.next() {
            let Some(locker) = allocation.locker() else { continue };
            let amount = allocation.tokens(total_supply)?;
            match self.gateway.transfer(project.chain_id, token, locker, amount).await {
                Ok(receipt) => {
                    info!(allocation = %allocation.id, %amount, tx_hash = ?receipt.tx_hash, "locker funded");
                    result.record_ok(allocation.id.clone());
                }
                Err(e) => {
                    warn!(allocation = %allocation.id, error = %e, "locker transfer failed, stopping");
                    result.record_err(allocation.id.clone(), &e);
                    result.skip_rest(pending.map(|a| a.id.clone()));
                    break;
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contracts::TxReceipt, error::TxFailure, testing};
    use async_trait::async_trait;
    use ethers::types::U256;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(Address, Vec<(Address, U256)>),
        Reset(Address, Vec<(Address, U256)>),
        Finalize(Address),
        Transfer { to: Address, amount: U256 },
    }

    #[derive(Default)]
    struct MockLocker {
        calls: Mutex<Vec<Call>>,
        on_chain_finalized: bool,
        fail_transfer_to: Option<Address>,
    }

    impl MockLocker {
        fn ok(&self, call: Call) -> Result<TxReceipt, LaunchpadError> {
            self.calls.lock().push(call);
            Ok(testing::receipt(0xee))
        }
    }

    #[async_trait]
    impl LockerGateway for Arc<MockLocker> {
        async fn set_beneficiaries(&self, _: u64, locker: Address, amounts: &[(Address, U256)]) -> Result<TxReceipt, LaunchpadError> {
            self.ok(Call::Set(locker, amounts.to_vec()))
        }
        async fn reset_beneficiaries(&self, _: u64, locker: Address, amounts: &[(Address, U256)]) -> Result<TxReceipt, LaunchpadError> {
            self.ok(Call::Reset(locker, amounts.to_vec()))
        }
        async fn finalize(&self, _: u64, locker: Address) -> Result<TxReceipt, LaunchpadError> {
            self.ok(Call::Finalize(locker))
        }
        async fn is_finalized(&self, _: u64, _: Address) -> Result<bool, LaunchpadError> {
            Ok(self.on_chain_finalized)
        }
        async fn transfer(&self, _: u64, _: Address, to: Address, amount: U256) -> Result<TxReceipt, LaunchpadError> {
            if self.fail_transfer_to == Some(to) {
                return Err(LaunchpadError::Chain(TxFailure::Revert { reason: "ERC20: transfer amount exceeds balance".into() }));
            }
            self.ok(Call::Transfer { to, amount })
        }
    }

    fn orchestrator(mock: Arc<MockLocker>) -> (LockerOrchestrator<Arc<MockLocker>>, Arc<testing::RecordingBackend>) {
        let (outbox, backend) = testing::outbox();
        (LockerOrchestrator::new(mock, testing::wallet(true), outbox), backend)
    }

    fn units(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[tokio::test]
    async fn add_beneficiaries_converts_percent_of_allocation() {
        let mock = Arc::new(MockLocker::default());
        let (orch, backend) = orchestrator(mock.clone());
        let project = testing::project();
        let team = project.allocation("team").unwrap();

        let mut form = BeneficiaryForm::new();
        let (rows, _) = parse_bulk(
            "0x1111111111111111111111111111111111111111,25\n0x2222222222222222222222222222222222222222,75",
        );
        form.merge_pasted(rows);
        orch.add_beneficiaries(&project, team, &form).await.unwrap();

        let expected = vec![
            (Address::repeat_byte(0x11), units(50_000)),
            (Address::repeat_byte(0x22), units(150_000)),
        ];
        assert_eq!(*mock.calls.lock(), vec![Call::Set(Address::repeat_byte(0xa1), expected)]);
        assert!(matches!(&backend.jobs.lock()[0], SyncJob::BeneficiariesAdded { beneficiaries, .. } if beneficiaries.len() == 2));
    }

    #[tokio::test]
    async fn invalid_total_blocks_submission() {
        let mock = Arc::new(MockLocker::default());
        let (orch, backend) = orchestrator(mock.clone());
        let project = testing::project();
        let form = BeneficiaryForm {
            rows: vec![BeneficiaryRow::new("0x1111111111111111111111111111111111111111", "99.9999")],
        };
        let err = orch.add_beneficiaries(&project, project.allocation("team").unwrap(), &form).await.unwrap_err();
        assert!(matches!(err, LaunchpadError::Validation(_)));
        assert!(mock.calls.lock().is_empty());
        assert!(backend.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn finalized_allocation_is_read_only() {
        let mock = Arc::new(MockLocker::default());
        let (orch, _) = orchestrator(mock.clone());
        let project = testing::project();
        let mut team = project.allocation("team").unwrap().clone();
        team.is_finalized = true;
        let form = BeneficiaryForm::from_allocation(&team);
        assert!(matches!(
            orch.add_beneficiaries(&project, &team, &form).await,
            Err(LaunchpadError::AllocationFinalized(_))
        ));
        assert!(matches!(orch.finalize(&project, &team).await, Err(LaunchpadError::AllocationFinalized(_))));

        let presale = project.allocation("presale").unwrap();
        assert!(matches!(orch.finalize(&project, presale).await, Err(LaunchpadError::NoLocker(_))));
        assert!(mock.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn finalize_checks_chain_state() {
        let mock = Arc::new(MockLocker { on_chain_finalized: true, ..Default::default() });
        let (orch, backend) = orchestrator(mock.clone());
        let project = testing::project();
        let team = project.allocation("team").unwrap();
        assert!(matches!(orch.finalize(&project, team).await, Err(LaunchpadError::AllocationFinalized(_))));

        let mock = Arc::new(MockLocker::default());
        let (orch, _) = orchestrator(mock.clone());
        orch.finalize(&project, team).await.unwrap();
        assert_eq!(*mock.calls.lock(), vec![Call::Finalize(Address::repeat_byte(0xa1))]);
        assert!(backend.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn remove_resubmits_unchecked_rows() {
        let mock = Arc::new(MockLocker::default());
        let (orch, backend) = orchestrator(mock.clone());
        let project = testing::project();
        let mut team = project.allocation("team").unwrap().clone();
        team.addresses = vec![
            testing::beneficiary(Some("b1"), 1, "50"),
            testing::beneficiary(Some("b2"), 2, "50"),
        ];
        let mut form = BeneficiaryForm::from_allocation(&team);
        form.toggle(1);
        form.rows[0].amount = "100".into();

        orch.remove_beneficiaries(&project, &team, &form).await.unwrap();
        assert_eq!(
            *mock.calls.lock(),
            vec![Call::Reset(Address::repeat_byte(0xa1), vec![(Address::repeat_byte(1), units(200_000))])]
        );
        let jobs = backend.jobs.lock();
        assert!(matches!(&jobs[0], SyncJob::BeneficiariesReset { removed_ids, .. } if removed_ids == &vec!["b2".to_string()]));
    }

    #[tokio::test]
    async fn transfer_to_vesting_funds_vested_lockers_in_order() {
        let mock = Arc::new(MockLocker::default());
        let (orch, _) = orchestrator(mock.clone());
        let result = orch.transfer_to_vesting(&testing::project()).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.succeeded, vec!["team".to_string(), "advisors".to_string()]);
        assert_eq!(
            *mock.calls.lock(),
            vec![
                Call::Transfer { to: Address::repeat_byte(0xa1), amount: units(200_000) },
                Call::Transfer { to: Address::repeat_byte(0xa2), amount: units(300_000) },
            ]
        );
    }

    #[tokio::test]
    async fn transfer_to_vesting_stops_at_first_failure() {
        let mock = Arc::new(MockLocker { fail_transfer_to: Some(Address::repeat_byte(0xa1)), ..Default::default() });
        let (orch, _) = orchestrator(mock.clone());
        let result = orch.transfer_to_vesting(&testing::project()).await.unwrap();
        assert!(!result.is_complete());
        assert!(result.succeeded.is_empty());
        assert_eq!(result.failed[0].item, "team");
        assert!(result.failed[0].error.contains("exceeds balance"));
        assert_eq!(result.skipped, vec!["advisors".to_string()]);
        assert!(mock.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn save_allocations_validates_supply() {
        let mock = Arc::new(MockLocker::default());
        let (orch, backend) = orchestrator(mock);
        let project = testing::project();
        assert!(orch.save_allocations(&project, project.allocations[..2].to_vec()).await.is_err());
        assert!(backend.jobs.lock().is_empty());
        assert_eq!(orch.save_allocations(&project, project.allocations.clone()).await.unwrap(), SyncStatus::Delivered);
        assert_eq!(backend.jobs.lock().len(), 1);
    }
}
