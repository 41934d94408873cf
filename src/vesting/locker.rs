use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::{
    contracts::{read, send_tx, Bindings, TxReceipt},
    error::LaunchpadError,
    metrics::Metrics,
    provider::{RpcSelector, WalletAdapter},
};

/// Chain side of the locker flow.
#[async_trait]
pub trait LockerGateway: Send + Sync + 'static {
    async fn set_beneficiaries(
        &self,
        chain_id: u64,
        locker: Address,
        amounts: &[(Address, U256)],
    ) -> Result<TxReceipt, LaunchpadError>;

    async fn reset_beneficiaries(
        &self,
        chain_id: u64,
        locker: Address,
        amounts: &[(Address, U256)],
    ) -> Result<TxReceipt, LaunchpadError>;

    async fn finalize(&self, chain_id: u64, locker: Address) -> Result<TxReceipt, LaunchpadError>;

    async fn is_finalized(&self, chain_id: u64, locker: Address) -> Result<bool, LaunchpadError>;

    /// ERC-20 `transfer` on the project token.
    async fn transfer(&self, chain_id: u64, token: Address, to: Address, amount: U256) -> Result<TxReceipt, LaunchpadError>;
}

pub struct EthersLockerGateway {
    selector: Arc<RpcSelector>,
    wallet: Arc<WalletAdapter>,
    metrics: Arc<dyn Metrics>,
}

impl EthersLockerGateway {
    pub fn new(selector: Arc<RpcSelector>, wallet: Arc<WalletAdapter>, metrics: Arc<dyn Metrics>) -> Self {
        Self { selector, wallet, metrics }
    }
}

fn unzip(amounts: &[(Address, U256)]) -> (Vec<Address>, Vec<U256>) {
    amounts.iter().copied().unzip()
}

#[async_trait]
impl LockerGateway for EthersLockerGateway {
    async fn set_beneficiaries(
        &self,
        chain_id: u64,
        locker: Address,
        amounts: &[(Address, U256)],
    ) -> Result<TxReceipt, LaunchpadError> {
        let (who, how_much) = unzip(amounts);
        let call = Bindings::new(self.wallet.session(chain_id)?).locker(locker).set_beneficiaries(who, how_much);
        send_tx("set_beneficiaries", call, &*self.metrics).await
    }

    async fn reset_beneficiaries(
        &self,
        chain_id: u64,
        locker: Address,
        amounts: &[(Address, U256)],
    ) -> Result<TxReceipt, LaunchpadError> {
        let (who, how_much) = unzip(amounts);
        let call = Bindings::new(self.wallet.session(chain_id)?).locker(locker).reset_beneficiaries(who, how_much);
        send_tx("reset_beneficiaries", call, &*self.metrics).await
    }

    async fn finalize(&self, chain_id: u64, locker: Address) -> Result<TxReceipt, LaunchpadError> {
        let call = Bindings::new(self.wallet.session(chain_id)?).locker(locker).finalize();
        send_tx("finalize_locker", call, &*self.metrics).await
    }

    async fn is_finalized(&self, chain_id: u64, locker: Address) -> Result<bool, LaunchpadError> {
        let rp = self.selector.read_provider(chain_id).await?;
        read(Bindings::new(rp.provider).locker(locker).is_finalized()).await
    }

    async fn transfer(&self, chain_id: u64, token: Address, to: Address, amount: U256) -> Result<TxReceipt, LaunchpadError> {
        let call = Bindings::new(self.wallet.session(chain_id)?).token(token).transfer(to, amount);
        send_tx("transfer_to_locker", call, &*self.metrics).await
    }
}
