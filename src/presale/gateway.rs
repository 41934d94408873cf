use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use super::{ActivationParams, PresaleGateway, PresaleSnapshot};
use crate::{
    contracts::{read, send_tx, Bindings, PresaleManager, TxReceipt},
    error::LaunchpadError,
    metrics::Metrics,
    provider::{HttpProvider, RpcSelector, SignerClient, WalletAdapter},
};

/// Reads through the adopted public RPC, writes through a fresh signer session.
pub struct EthersPresaleGateway {
    selector: Arc<RpcSelector>,
    wallet: Arc<WalletAdapter>,
    metrics: Arc<dyn Metrics>,
}

impl EthersPresaleGateway {
    pub fn new(selector: Arc<RpcSelector>, wallet: Arc<WalletAdapter>, metrics: Arc<dyn Metrics>) -> Self {
        Self { selector, wallet, metrics }
    }

    async fn reader(&self, chain_id: u64, contract: Address) -> Result<PresaleManager<HttpProvider>, LaunchpadError> {
        let rp = self.selector.read_provider(chain_id).await?;
        Ok(Bindings::new(rp.provider).presale(contract))
    }

    fn writer(&self, chain_id: u64, contract: Address) -> Result<PresaleManager<SignerClient>, LaunchpadError> {
        Ok(Bindings::new(self.wallet.session(chain_id)?).presale(contract))
    }
}

fn saturating_u64(v: U256) -> u64 {
    if v > U256::from(u64::MAX) {
        u64::MAX
    } else {
        v.as_u64()
    }
}

#[async_trait]
impl PresaleGateway for EthersPresaleGateway {
    async fn activate(&self, chain_id: u64, contract: Address, p: &ActivationParams) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id, contract)?.activate_presale(
            p.token,
            p.whitelist,
            p.hard_cap,
            p.price,
            p.max_contribution,
            p.start_time.into(),
            p.duration.into(),
            p.whitelist_duration.into(),
            p.claim_time.into(),
            p.sweep_duration.into(),
        );
        send_tx("activate_presale", call, &*self.metrics).await
    }

    async fn presale_count(&self, chain_id: u64, contract: Address) -> Result<u64, LaunchpadError> {
        let count = read(self.reader(chain_id, contract).await?.presale_count()).await?;
        Ok(saturating_u64(count))
    }

    async fn snapshot(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<PresaleSnapshot, LaunchpadError> {
        let (
            start_time,
            end_time,
            claim_time,
            claim_delay,
            finalized,
            hard_cap,
            total_raised,
            tokens_needed,
            initial_release_bps,
            cliff_duration,
            vesting_duration,
            sweep_duration,
        ) = read(self.reader(chain_id, contract).await?.presales(presale_id.into())).await?;
        Ok(PresaleSnapshot {
            start_time: saturating_u64(start_time),
            end_time: saturating_u64(end_time),
            claim_time: saturating_u64(claim_time),
            claim_delay: saturating_u64(claim_delay),
            finalized,
            hard_cap,
            total_raised,
            tokens_needed,
            initial_release_bps: saturating_u64(initial_release_bps),
            cliff_duration: saturating_u64(cliff_duration),
            vesting_duration: saturating_u64(vesting_duration),
            sweep_duration: saturating_u64(sweep_duration),
        })
    }

    async fn start_time(&self, chain_id: u64, contract: Address) -> Result<u64, LaunchpadError> {
        let start = read(self.reader(chain_id, contract).await?.start_time()).await?;
        Ok(saturating_u64(start))
    }

    async fn contribute(&self, chain_id: u64, contract: Address, user: Address, value: U256) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id, contract)?.contribute(user).value(value);
        send_tx("contribute", call, &*self.metrics).await
    }

    async fn claimable_tokens(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError> {
        read(self.reader(chain_id, contract).await?.get_claimable_tokens(user)).await
    }

    async fn contribution(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError> {
        read(self.reader(chain_id, contract).await?.get_contribution(user)).await
    }

    async fn claimed_tokens(&self, chain_id: u64, contract: Address, user: Address) -> Result<U256, LaunchpadError> {
        read(self.reader(chain_id, contract).await?.get_claimed_tokens(user)).await
    }

    async fn has_been_refunded(&self, chain_id: u64, contract: Address, user: Address) -> Result<bool, LaunchpadError> {
        read(self.reader(chain_id, contract).await?.has_user_been_refunded(user)).await
    }

    async fn claim(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id, contract)?.claim_tokens(presale_id.into());
        send_tx("claim", call, &*self.metrics).await
    }

    async fn refund(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id, contract)?.refund(presale_id.into());
        send_tx("refund", call, &*self.metrics).await
    }

    async fn sweep(&self, chain_id: u64, contract: Address, presale_id: u64) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id, contract)?.sweep_unclaimed_tokens(presale_id.into());
        send_tx("sweep", call, &*self.metrics).await
    }
}
