//! Shared state for one embedding session.

use std::sync::Arc;

use ethers::types::Address;
use secrecy::SecretString;
use tracing::info;

use crate::{
    airdrop::{AirdropOrchestrator, EthersAirdropGateway},
    backend::HttpBackend,
    config::Config,
    contracts::ContractArtifact,
    error::LaunchpadError,
    liquidity::{EthersLiquidityGateway, LiquidityOrchestrator},
    market::{BalanceKind, ChainBalances, CoinGecko, MarketData, TrackedToken},
    metrics::Metrics,
    outbox::{FileOutboxStore, MemoryOutboxStore, OutboxStore, RetryPolicy, SyncOutbox},
    presale::{EthersPresaleGateway, PresaleOrchestrator},
    provider::{ChainRegistry, RpcSelector, WalletAdapter},
    vesting::{EthersLockerGateway, LockerOrchestrator},
};

pub type Presales = PresaleOrchestrator<EthersPresaleGateway>;
pub type Lockers = LockerOrchestrator<EthersLockerGateway>;
pub type Airdrops = AirdropOrchestrator<EthersAirdropGateway>;
pub type Liquidity = LiquidityOrchestrator<EthersLiquidityGateway>;
pub type Market = MarketData<CoinGecko, ChainBalances>;

/// Everything the orchestrators share: chain registry, read-provider
/// selection, the connected wallet, the backend outbox and the caches.
pub struct LaunchpadContext {
    pub config: Config,
    pub registry: Arc<ChainRegistry>,
    pub selector: Arc<RpcSelector>,
    pub wallet: Arc<WalletAdapter>,
    pub outbox: Arc<SyncOutbox>,
    pub metrics: Arc<dyn Metrics>,
    pub presale: Presales,
    pub locker: Lockers,
    pub airdrop: Airdrops,
    pub liquidity: Liquidity,
    pub market: Arc<Market>,
}

impl LaunchpadContext {
    pub async fn build(config: Config, metrics: Arc<dyn Metrics>) -> Result<Self, LaunchpadError> {
        let registry = Arc::new(ChainRegistry::new(&config.chains));
        let selector = Arc::new(RpcSelector::new(registry.clone(), config.rpc.probe_timeout).with_metrics(metrics.clone()));
        let wallet = Arc::new(WalletAdapter::new(registry.clone()));
        if let Some(key) = &config.wallet.private_key {
            wallet.connect(key)?;
        }

        let store: Arc<dyn OutboxStore> = match &config.outbox.path {
            Some(path) => Arc::new(FileOutboxStore::open(path).await?),
            None => Arc::new(MemoryOutboxStore::default()),
        };
        let backend = Arc::new(HttpBackend::from_config(&config.backend)?);
        let outbox = Arc::new(
            SyncOutbox::new(backend, store, RetryPolicy::from(&config.outbox)).with_metrics(metrics.clone()),
        );

        let artifact = match &config.airdrop.artifact_path {
            Some(path) => Some(ContractArtifact::load(path).await?),
            None => None,
        };

        let presale = PresaleOrchestrator::new(
            EthersPresaleGateway::new(selector.clone(), wallet.clone(), metrics.clone()),
            registry.clone(),
            wallet.clone(),
            outbox.clone(),
            config.presale.clone(),
        );
        let locker = LockerOrchestrator::new(
            EthersLockerGateway::new(selector.clone(), wallet.clone(), metrics.clone()),
            wallet.clone(),
            outbox.clone(),
        );
        let airdrop = AirdropOrchestrator::new(
            EthersAirdropGateway::new(wallet.clone(), metrics.clone(), artifact),
            wallet.clone(),
            outbox.clone(),
        );
        let liquidity = LiquidityOrchestrator::new(
            EthersLiquidityGateway::new(selector.clone(), wallet.clone(), metrics.clone()),
            registry.clone(),
            wallet.clone(),
            config.liquidity.clone(),
        );
        let market = Arc::new(MarketData::new(
            CoinGecko::new(&config.market.coingecko_url, config.backend.timeout)?,
            ChainBalances::new(selector.clone()),
            wallet.clone(),
            config.market.clone(),
        ));

        info!(target: "context", chains = registry.ids().count(), wallet = ?wallet.address(), "context ready");
        Ok(Self {
            config,
            registry,
            selector,
            wallet,
            outbox,
            metrics,
            presale,
            locker,
            airdrop,
            liquidity,
            market,
        })
    }

    pub fn connect(&self, key: &SecretString) -> Result<Address, LaunchpadError> {
        let address = self.wallet.connect(key)?;
        self.market.reset();
        Ok(address)
    }

    /// Forget the signer, adopted RPC endpoints and cached market data.
    pub fn disconnect(&self) {
        self.wallet.disconnect();
        self.selector.reset();
        self.market.reset();
    }

    /// Track the native coin and the stablecoin of `chain_id` in the market
    /// cache, replacing entries with the same symbols.
    pub fn track_chain(&self, chain_id: u64) -> Result<(), LaunchpadError> {
        let chain = self.registry.get(chain_id)?;
        self.market.track(TrackedToken {
            symbol: chain.native_symbol.clone(),
            chain_id,
            kind: BalanceKind::Native,
            decimals: 18,
        });
        self.market.track(TrackedToken {
            symbol: chain.stablecoin.symbol.clone(),
            chain_id,
            kind: BalanceKind::Erc20(chain.stablecoin.address),
            decimals: chain.stablecoin.decimals,
        });
        Ok(())
    }

    /// Track a project token; its "balance" is the total supply.
    pub fn track_project_token(&self, symbol: &str, chain_id: u64, token: Address, decimals: u8) {
        self.market.track(TrackedToken {
            symbol: symbol.to_uppercase(),
            chain_id,
            kind: BalanceKind::Supply(token),
            decimals,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::NoopMetrics, testing};

    #[tokio::test]
    async fn build_connect_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.outbox.path = Some(dir.path().join("outbox.json"));
        config.wallet.private_key = Some(SecretString::new(testing::KEY.into()));

        let ctx = LaunchpadContext::build(config, Arc::new(NoopMetrics)).await.unwrap();
        assert!(ctx.wallet.address().is_some());
        assert!(ctx.outbox.pending().await.unwrap().is_empty());

        ctx.track_chain(56).unwrap();
        ctx.track_project_token("prj", 56, Address::repeat_byte(0x70), 18);
        let symbols: Vec<_> = ctx.market.tracked().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols, ["BNB", "USDT", "PRJ"]);
        // USDT on chain 1 replaces the chain 56 entry
        ctx.track_chain(1).unwrap();
        let usdt = ctx.market.tracked().into_iter().find(|t| t.symbol == "USDT").unwrap();
        assert_eq!((usdt.chain_id, usdt.decimals), (1, 6));

        ctx.disconnect();
        assert!(ctx.wallet.address().is_none());
        assert!(matches!(ctx.track_chain(999), Err(LaunchpadError::UnknownChain(999))));
    }
}
