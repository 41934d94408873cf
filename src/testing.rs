//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ethers::types::{Address, H256};
use parking_lot::Mutex;
use secrecy::SecretString;

use crate::{
    backend::{BackendApi, BackendError, SyncJob},
    config::Config,
    contracts::TxReceipt,
    model::{Allocation, BeneficiaryEntry, Presale, PresaleUnit, Project, ProjectStatus},
    outbox::{MemoryOutboxStore, RetryPolicy, SyncOutbox},
    provider::{ChainRegistry, WalletAdapter},
    units::Percent,
};

pub const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

#[derive(Default)]
pub struct RecordingBackend {
    pub jobs: Mutex<Vec<SyncJob>>,
}

#[async_trait]
impl BackendApi for RecordingBackend {
    async fn deliver(&self, job: &SyncJob) -> Result<(), BackendError> {
        self.jobs.lock().push(job.clone());
        Ok(())
    }
}

pub fn outbox() -> (Arc<SyncOutbox>, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let policy = RetryPolicy::from(&Config::default().outbox);
    let outbox = SyncOutbox::new(backend.clone(), Arc::new(MemoryOutboxStore::default()), policy);
    (Arc::new(outbox), backend)
}

pub fn registry() -> Arc<ChainRegistry> {
    let mut config = Config::default();
    for chain in &mut config.chains {
        chain.presale_contract = Some(Address::repeat_byte(0x50));
    }
    Arc::new(ChainRegistry::new(&config.chains))
}

pub fn wallet(connected: bool) -> Arc<WalletAdapter> {
    let wallet = WalletAdapter::new(registry());
    if connected {
        wallet.connect(&SecretString::new(KEY.into())).unwrap();
    }
    Arc::new(wallet)
}

pub fn receipt(n: u8) -> TxReceipt {
    TxReceipt { tx_hash: H256::repeat_byte(n), block_number: Some(1), contract_address: None, logs: vec![] }
}

pub fn percent(s: &str) -> Percent {
    s.parse().unwrap()
}

pub fn project() -> Project {
    Project {
        id: "p1".into(),
        name: "Acme".into(),
        ticker: "ACME".into(),
        decimals: 18,
        total_supply: "1000000".into(),
        contract_address: Some(Address::repeat_byte(0x70)),
        chain_id: 56,
        allocations: vec![
            allocation("team", "20", 12, Some(Address::repeat_byte(0xa1))),
            allocation("presale", "50", 0, None),
            allocation("advisors", "30", 6, Some(Address::repeat_byte(0xa2))),
        ],
        presales: vec![presale()],
        socials: Default::default(),
        status: ProjectStatus::Live,
    }
}

pub fn allocation(id: &str, supply: &str, vesting: u32, locker: Option<Address>) -> Allocation {
    Allocation {
        id: id.into(),
        name: id.to_uppercase(),
        supply: percent(supply),
        vesting,
        start_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        contract_address: locker,
        is_finalized: false,
        addresses: vec![],
    }
}

pub fn beneficiary(id: Option<&str>, byte: u8, amount: &str) -> BeneficiaryEntry {
    BeneficiaryEntry {
        id: id.map(String::from),
        address: Address::repeat_byte(byte),
        amount: percent(amount),
        is_checked: false,
    }
}

pub fn presale() -> Presale {
    Presale {
        id: "s1".into(),
        project_id: "p1".into(),
        hardcap: "100".into(),
        price: "0.01".into(),
        unit: PresaleUnit::Native,
        max_contribution: "5".into(),
        start_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        end_date: Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
        duration_days: 14,
        whitelist_contract: None,
        whitelist_duration_days: None,
        presale_scid: Some(3),
        is_withdrawn: false,
    }
}
