//! Backend mutations issued after confirmed transactions.
//!
//! Each mutation is a [`SyncJob`] value so it can be persisted by the outbox
//! and replayed. The REST shapes themselves belong to the backend; this
//! module only knows the route and body for each job.

use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    types::{Address, H256},
    utils::{hex, keccak256},
};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    airdrop::AirdropEntry,
    config::Backend as BackendConfig,
    model::{Allocation, BeneficiaryEntry},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncJob {
    ContributionRecorded {
        presale_id: String,
        project_id: String,
        price: String,
        count: f64,
        transaction_hash: H256,
    },
    PresaleActivated {
        presale_id: String,
        presale_scid: u64,
        transaction_hash: H256,
    },
    PresaleWithdrawn {
        presale_id: String,
        transaction_hash: H256,
    },
    AllocationsSaved {
        project_id: String,
        allocations: Vec<Allocation>,
    },
    BeneficiariesAdded {
        allocation_id: String,
        beneficiaries: Vec<BeneficiaryEntry>,
        transaction_hash: H256,
    },
    BeneficiariesReset {
        allocation_id: String,
        beneficiaries: Vec<BeneficiaryEntry>,
        removed_ids: Vec<String>,
        transaction_hash: H256,
    },
    LockerFinalized {
        allocation_id: String,
        transaction_hash: H256,
    },
    AirdropDeployed {
        reward_id: String,
        contract_address: Address,
        transaction_hash: H256,
    },
    AirdropAllocationsSet {
        reward_id: String,
        allocations: Vec<AirdropEntry>,
        transaction_hash: H256,
    },
    AirdropAllocationsCleared {
        reward_id: String,
        addresses: Vec<Address>,
        transaction_hash: H256,
    },
}

impl SyncJob {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncJob::ContributionRecorded { .. } => "contribution_recorded",
            SyncJob::PresaleActivated { .. } => "presale_activated",
            SyncJob::PresaleWithdrawn { .. } => "presale_withdrawn",
            SyncJob::AllocationsSaved { .. } => "allocations_saved",
            SyncJob::BeneficiariesAdded { .. } => "beneficiaries_added",
            SyncJob::BeneficiariesReset { .. } => "beneficiaries_reset",
            SyncJob::LockerFinalized { .. } => "locker_finalized",
            SyncJob::AirdropDeployed { .. } => "airdrop_deployed",
            SyncJob::AirdropAllocationsSet { .. } => "airdrop_allocations_set",
            SyncJob::AirdropAllocationsCleared { .. } => "airdrop_allocations_cleared",
        }
    }

    /// Stable across retries and restarts. Sent as `Idempotency-Key`.
    pub fn idempotency_key(&self) -> String {
        match self {
            SyncJob::ContributionRecorded { transaction_hash, .. }
            | SyncJob::PresaleActivated { transaction_hash, .. }
            | SyncJob::PresaleWithdrawn { transaction_hash, .. }
            | SyncJob::BeneficiariesAdded { transaction_hash, .. }
            | SyncJob::BeneficiariesReset { transaction_hash, .. }
            | SyncJob::LockerFinalized { transaction_hash, .. }
            | SyncJob::AirdropDeployed { transaction_hash, .. }
            | SyncJob::AirdropAllocationsSet { transaction_hash, .. }
            | SyncJob::AirdropAllocationsCleared { transaction_hash, .. } => {
                format!("{}:{transaction_hash:?}", self.kind())
            }
            // No transaction behind it; key on content.
            SyncJob::AllocationsSaved { project_id, .. } => {
                let body = serde_json::to_vec(self).unwrap_or_default();
                format!("{}:{project_id}:{}", self.kind(), hex::encode(&keccak256(body)[..8]))
            }
        }
    }

    /// Method, path relative to the backend base url, JSON body.
    pub fn request(&self) -> (Method, String, Value) {
        match self {
            SyncJob::ContributionRecorded { presale_id, project_id, price, count, transaction_hash } => (
                Method::POST,
                format!("presales/{presale_id}/contributions"),
                json!({
                    "presaleId": presale_id,
                    "projectId": project_id,
                    "price": price,
                    "count": count,
                    "transactionHash": transaction_hash,
                }),
            ),
            SyncJob::PresaleActivated { presale_id, presale_scid, .. } => (
                Method::PATCH,
                format!("presales/{presale_id}"),
                json!({ "presaleSCID": presale_scid }),
            ),
            SyncJob::PresaleWithdrawn { presale_id, .. } => (
                Method::PATCH,
                format!("presales/{presale_id}"),
                json!({ "isWithdrawn": true }),
            ),
            SyncJob::AllocationsSaved { project_id, allocations } => (
                Method::PUT,
                format!("projects/{project_id}/allocations"),
                json!({ "allocations": allocations }),
            ),
            SyncJob::BeneficiariesAdded { allocation_id, beneficiaries, .. } => (
                Method::POST,
                format!("allocations/{allocation_id}/addresses"),
                json!({ "addresses": beneficiaries }),
            ),
            SyncJob::BeneficiariesReset { allocation_id, beneficiaries, removed_ids, .. } => (
                Method::PUT,
                format!("allocations/{allocation_id}/addresses"),
                json!({ "addresses": beneficiaries, "removedIds": removed_ids }),
            ),
            SyncJob::LockerFinalized { allocation_id, .. } => (
                Method::PATCH,
                format!("allocations/{allocation_id}"),
                json!({ "isFinalized": true }),
            ),
            SyncJob::AirdropDeployed { reward_id, contract_address, .. } => (
                Method::PATCH,
                format!("additional-rewards/{reward_id}"),
                json!({ "contractAddress": contract_address }),
            ),
            SyncJob::AirdropAllocationsSet { reward_id, allocations, .. } => (
                Method::POST,
                format!("additional-rewards/{reward_id}/allocations"),
                json!({ "allocations": allocations }),
            ),
            SyncJob::AirdropAllocationsCleared { reward_id, addresses, .. } => (
                Method::DELETE,
                format!("additional-rewards/{reward_id}/allocations"),
                json!({ "addresses": addresses }),
            ),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// 4xx. Replaying the same request will not help.
    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("backend error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("backend transport: {0}")]
    Transport(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Server { .. } | BackendError::Transport(_))
    }
}

#[async_trait]
pub trait BackendApi: Send + Sync + 'static {
    async fn deliver(&self, job: &SyncJob) -> Result<(), BackendError>;
}

/// `reqwest` client for the launchpad REST API.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration, token: Option<SecretString>) -> Result<Self, BackendError> {
        let mut base = Url::parse(base_url).map_err(|_| BackendError::InvalidUrl(base_url.into()))?;
        // Url::join drops the last segment without a trailing slash.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self { http, base, token })
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self, BackendError> {
        Self::new(&cfg.base_url, cfg.timeout, cfg.api_token.clone())
    }

    pub fn url_for(&self, path: &str) -> Result<Url, BackendError> {
        self.base.join(path).map_err(|_| BackendError::InvalidUrl(path.into()))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn deliver(&self, job: &SyncJob) -> Result<(), BackendError> {
        let (method, path, body) = job.request();
        let url = self.url_for(&path)?;
        debug!(target: "backend", kind = job.kind(), %method, %url, "delivering sync job");

        let mut req = self
            .http
            .request(method, url)
            .header("Idempotency-Key", job.idempotency_key())
            .json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req.send().await.map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

fn classify_status(status: StatusCode, body: String) -> BackendError {
    // 408 and 429 are worth another attempt.
    if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT && status != StatusCode::TOO_MANY_REQUESTS {
        BackendError::Rejected { status: status.as_u16(), body }
    } else {
        BackendError::Server { status: status.as_u16(), body }
    }
}
