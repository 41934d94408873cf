//! Wallet/provider adapter.
//!
//! Reads go through [`RpcSelector`], which probes each chain's public RPC
//! list and adopts the first healthy endpoint. Writes go through a signer
//! session built by [`WalletAdapter::session`], fresh on every call.

use std::{collections::BTreeMap, collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, JsonRpcClient, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, U256},
};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::ChainConfig,
    error::LaunchpadError,
    metrics::{Metrics, NoopMetrics},
};

pub type HttpProvider = Provider<Http>;
pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Validated chain configs by id.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainConfig>,
}

impl ChainRegistry {
    pub fn new(chains: &[ChainConfig]) -> Self {
        Self { chains: chains.iter().map(|c| (c.chain_id, c.clone())).collect() }
    }

    pub fn get(&self, chain_id: u64) -> Result<&ChainConfig, LaunchpadError> {
        self.chains.get(&chain_id).ok_or(LaunchpadError::UnknownChain(chain_id))
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ReadSource {
    /// Position in the chain's public list.
    Public { index: usize },
    /// Every public endpoint failed.
    WalletFallback,
}

#[derive(Debug, Clone)]
pub struct ReadProvider {
    pub chain_id: u64,
    pub url: String,
    pub source: ReadSource,
    pub provider: Arc<HttpProvider>,
}

fn http_provider(url: &str) -> Result<HttpProvider, LaunchpadError> {
    Provider::<Http>::try_from(url).map_err(|e| LaunchpadError::Rpc(format!("{url}: {e}")))
}

/// `eth_chainId` then `eth_blockNumber`, both inside `budget`. Returns the
/// block number on success.
pub async fn probe<P>(provider: &Provider<P>, expected_chain: u64, budget: Duration) -> Result<u64, String>
where
    P: JsonRpcClient + Debug,
{
    let calls = async {
        let chain = provider.get_chainid().await.map_err(|e| e.to_string())?;
        let block = provider.get_block_number().await.map_err(|e| e.to_string())?;
        Ok::<_, String>((chain, block))
    };
    match timeout(budget, calls).await {
        Err(_) => Err(format!("no response within {budget:?}")),
        Ok(Err(e)) => Err(e),
        Ok(Ok((chain, _))) if chain != U256::from(expected_chain) => {
            Err(format!("endpoint reports chain {chain}, expected {expected_chain}"))
        }
        Ok(Ok((_, block))) => Ok(block.as_u64()),
    }
}

/// Picks a read endpoint per chain and remembers it until [`reset`](Self::reset).
pub struct RpcSelector {
    registry: Arc<ChainRegistry>,
    probe_timeout: Duration,
    adopted: RwLock<HashMap<u64, ReadProvider>>,
    metrics: Arc<dyn Metrics>,
}

impl RpcSelector {
    pub fn new(registry: Arc<ChainRegistry>, probe_timeout: Duration) -> Self {
        Self { registry, probe_timeout, adopted: RwLock::new(HashMap::new()), metrics: Arc::new(NoopMetrics) }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Never fails for a configured chain: when no public endpoint answers,
    /// the wallet RPC is returned with [`ReadSource::WalletFallback`].
    #[instrument(skip(self))]
    pub async fn read_provider(&self, chain_id: u64) -> Result<ReadProvider, LaunchpadError> {
        if let Some(p) = self.adopted.read().get(&chain_id) {
            return Ok(p.clone());
        }
        let chain = self.registry.get(chain_id)?;

        for (index, url) in chain.rpc_urls.iter().enumerate() {
            let provider = match http_provider(url) {
                Ok(p) => p,
                Err(e) => {
                    debug!(target: "rpc", %url, error = %e, "skipping malformed endpoint");
                    continue;
                }
            };
            match probe(&provider, chain_id, self.probe_timeout).await {
                Ok(block) => {
                    self.metrics.rpc_probe(chain_id, true);
                    info!(target: "rpc", chain_id, %url, block, "adopted public rpc");
                    let chosen = ReadProvider {
                        chain_id,
                        url: url.clone(),
                        source: ReadSource::Public { index },
                        provider: Arc::new(provider),
                    };
                    self.adopted.write().insert(chain_id, chosen.clone());
                    return Ok(chosen);
                }
                Err(reason) => {
                    self.metrics.rpc_probe(chain_id, false);
                    debug!(target: "rpc", chain_id, %url, %reason, "rpc probe failed");
                }
            }
        }

        warn!(
            target: "rpc",
            chain_id,
            tried = chain.rpc_urls.len(),
            "no public rpc responded; falling back to the wallet provider"
        );
        Ok(ReadProvider {
            chain_id,
            url: chain.wallet_rpc.clone(),
            source: ReadSource::WalletFallback,
            provider: Arc::new(http_provider(&chain.wallet_rpc)?),
        })
    }

    /// Forget every adopted endpoint.
    pub fn reset(&self) {
        self.adopted.write().clear();
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }
}

/// The connected signer, if any.
pub struct WalletAdapter {
    registry: Arc<ChainRegistry>,
    signer: RwLock<Option<LocalWallet>>,
}

impl WalletAdapter {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry, signer: RwLock::new(None) }
    }

    /// Replace the connected key. Returns the wallet address.
    pub fn connect(&self, key: &SecretString) -> Result<Address, LaunchpadError> {
        let raw = key.expose_secret().trim();
        let hex = raw.strip_prefix("0x").unwrap_or(raw);
        let wallet: LocalWallet = hex
            .parse()
            .map_err(|_| LaunchpadError::InvalidWalletKey("not a secp256k1 private key".into()))?;
        let address = wallet.address();
        *self.signer.write() = Some(wallet);
        info!(target: "wallet", ?address, "wallet connected");
        Ok(address)
    }

    pub fn disconnect(&self) {
        if self.signer.write().take().is_some() {
            info!(target: "wallet", "wallet disconnected");
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.signer.read().as_ref().map(Signer::address)
    }

    pub fn require_address(&self) -> Result<Address, LaunchpadError> {
        self.address().ok_or(LaunchpadError::WalletNotConnected)
    }

    /// New signer client bound to `chain_id`. Switching networks is asking
    /// for a session on another chain.
    pub fn session(&self, chain_id: u64) -> Result<Arc<SignerClient>, LaunchpadError> {
        let wallet = self.signer.read().clone().ok_or(LaunchpadError::WalletNotConnected)?;
        let chain = self.registry.get(chain_id)?;
        let provider = http_provider(&chain.wallet_rpc)?;
        Ok(Arc::new(SignerMiddleware::new(provider, wallet.with_chain_id(chain_id))))
    }
}
