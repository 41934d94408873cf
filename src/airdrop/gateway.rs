use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use super::AirdropGateway;
use crate::{
    contracts::{deploy, send_tx, Bindings, ContractArtifact, TxReceipt},
    error::LaunchpadError,
    metrics::Metrics,
    provider::WalletAdapter,
};

/// Deploys from a compiled artifact; every call goes through a fresh signer
/// session on the requested chain.
pub struct EthersAirdropGateway {
    wallet: Arc<WalletAdapter>,
    metrics: Arc<dyn Metrics>,
    artifact: Option<Arc<ContractArtifact>>,
}

impl EthersAirdropGateway {
    pub fn new(wallet: Arc<WalletAdapter>, metrics: Arc<dyn Metrics>, artifact: Option<ContractArtifact>) -> Self {
        Self { wallet, metrics, artifact: artifact.map(Arc::new) }
    }
}

#[async_trait]
impl AirdropGateway for EthersAirdropGateway {
    async fn deploy(
        &self,
        chain_id: u64,
        owner: Address,
        token: Address,
        claim_start: u64,
        claim_end: u64,
    ) -> Result<TxReceipt, LaunchpadError> {
        let artifact = self
            .artifact
            .as_deref()
            .ok_or_else(|| LaunchpadError::Artifact("no airdrop artifact configured".into()))?;
        let client = self.wallet.session(chain_id)?;
        let args = (owner, token, U256::from(claim_start), U256::from(claim_end));
        deploy("deploy_airdrop", client, artifact, args, &*self.metrics).await
    }

    async fn set_allocations(&self, chain_id: u64, airdrop: Address, amounts: &[(Address, U256)]) -> Result<TxReceipt, LaunchpadError> {
        let (recipients, values): (Vec<Address>, Vec<U256>) = amounts.iter().copied().unzip();
        let call = Bindings::new(self.wallet.session(chain_id)?).airdrop(airdrop).set_allocations(recipients, values);
        send_tx("set_airdrop_allocations", call, &*self.metrics).await
    }

    async fn clear_allocations(&self, chain_id: u64, airdrop: Address, recipients: &[Address]) -> Result<TxReceipt, LaunchpadError> {
        let call = Bindings::new(self.wallet.session(chain_id)?).airdrop(airdrop).clear_allocations(recipients.to_vec());
        send_tx("clear_airdrop_allocations", call, &*self.metrics).await
    }

    async fn claim(&self, chain_id: u64, airdrop: Address) -> Result<TxReceipt, LaunchpadError> {
        let call = Bindings::new(self.wallet.session(chain_id)?).airdrop(airdrop).claim();
        send_tx("claim_airdrop", call, &*self.metrics).await
    }
}
