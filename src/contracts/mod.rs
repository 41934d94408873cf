//! Typed contract handles and the transaction submit path.
//!
//! Handles are cheap wrappers around an `Arc<M>`. They are created for a
//! single action and dropped with it; nothing here caches a handle across
//! chain switches.

pub mod launchpad;
pub mod uniswap;

use std::{path::Path, sync::Arc};

use ethers::{
    abi::{Abi, Detokenize},
    contract::{ContractCall, ContractError, ContractFactory},
    providers::Middleware,
    types::{Address, Bytes, Log, H256, U256},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    error::{LaunchpadError, TxFailure},
    metrics::Metrics,
};

pub use launchpad::{Airdrop, PresaleManager, ProjectToken, TokenLocker};
pub use uniswap::{NonfungiblePositionManager, QuoterV2, SwapRouter, UniswapV3Factory, UniswapV3Pool};

/// A deployed contract on a specific chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractRef {
    pub chain_id: u64,
    pub address: Address,
}

impl ContractRef {
    pub fn new(chain_id: u64, address: Address) -> Self {
        Self { chain_id, address }
    }
}

/// Mined transaction, success only.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

/// Factory for typed handles bound to one client.
#[derive(Debug)]
pub struct Bindings<M> {
    client: Arc<M>,
}

impl<M> Clone for Bindings<M> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone() }
    }
}

impl<M: Middleware> Bindings<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    pub fn presale(&self, at: Address) -> PresaleManager<M> {
        PresaleManager::new(at, self.client.clone())
    }

    pub fn token(&self, at: Address) -> ProjectToken<M> {
        ProjectToken::new(at, self.client.clone())
    }

    pub fn locker(&self, at: Address) -> TokenLocker<M> {
        TokenLocker::new(at, self.client.clone())
    }

    pub fn airdrop(&self, at: Address) -> Airdrop<M> {
        Airdrop::new(at, self.client.clone())
    }

    pub fn factory(&self, at: Address) -> UniswapV3Factory<M> {
        UniswapV3Factory::new(at, self.client.clone())
    }

    pub fn pool(&self, at: Address) -> UniswapV3Pool<M> {
        UniswapV3Pool::new(at, self.client.clone())
    }

    pub fn position_manager(&self, at: Address) -> NonfungiblePositionManager<M> {
        NonfungiblePositionManager::new(at, self.client.clone())
    }

    pub fn router(&self, at: Address) -> SwapRouter<M> {
        SwapRouter::new(at, self.client.clone())
    }

    pub fn quoter(&self, at: Address) -> QuoterV2<M> {
        QuoterV2::new(at, self.client.clone())
    }
}

fn chain_err<M: Middleware>(e: &ContractError<M>) -> LaunchpadError {
    LaunchpadError::Chain(TxFailure::from_contract_error(e))
}

/// `eth_call` a view function.
pub async fn read<M, D>(call: ContractCall<M, D>) -> Result<D, LaunchpadError>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    call.call().await.map_err(|e| chain_err(&e))
}

/// Send, then wait for one confirmation. No client-side timeout: the wallet
/// and the chain decide how long this takes.
pub async fn send_tx<M, D>(
    op: &'static str,
    call: ContractCall<M, D>,
    metrics: &dyn Metrics,
) -> Result<TxReceipt, LaunchpadError>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    metrics.tx_submitted(op);
    let outcome = async {
        let pending = call.send().await.map_err(|e| chain_err(&e))?;
        let tx_hash = pending.tx_hash();
        debug!(target: "tx", op, ?tx_hash, "transaction sent");
        let receipt = pending
            .await
            .map_err(|e| LaunchpadError::Chain(TxFailure::from_provider_error(&e)))?
            .ok_or_else(|| {
                LaunchpadError::Chain(TxFailure::Unknown { raw: format!("transaction {tx_hash:?} dropped") })
            })?;
        into_receipt(tx_hash, receipt)
    }
    .await;
    report(op, outcome, metrics)
}

/// Deploy from ABI + bytecode with constructor `args`.
pub async fn deploy<M, T>(
    op: &'static str,
    client: Arc<M>,
    artifact: &ContractArtifact,
    args: T,
    metrics: &dyn Metrics,
) -> Result<TxReceipt, LaunchpadError>
where
    M: Middleware + 'static,
    T: ethers::abi::Tokenize,
{
    metrics.tx_submitted(op);
    let outcome = async {
        let factory = ContractFactory::new(artifact.abi.clone(), artifact.bytecode.clone(), client);
        let deployer = factory.deploy(args).map_err(|e| chain_err(&e))?;
        let (_, receipt) = deployer.send_with_receipt().await.map_err(|e| chain_err(&e))?;
        into_receipt(receipt.transaction_hash, receipt)
    }
    .await;
    report(op, outcome, metrics)
}

fn into_receipt(tx_hash: H256, receipt: ethers::types::TransactionReceipt) -> Result<TxReceipt, LaunchpadError> {
    if receipt.status == Some(0u64.into()) {
        return Err(LaunchpadError::Chain(TxFailure::Revert {
            reason: format!("transaction {tx_hash:?} reverted on-chain"),
        }));
    }
    Ok(TxReceipt {
        tx_hash,
        block_number: receipt.block_number.map(|b| b.as_u64()),
        contract_address: receipt.contract_address,
        logs: receipt.logs,
    })
}

fn report(
    op: &'static str,
    outcome: Result<TxReceipt, LaunchpadError>,
    metrics: &dyn Metrics,
) -> Result<TxReceipt, LaunchpadError> {
    match &outcome {
        Ok(r) => info!(target: "tx", op, tx_hash = ?r.tx_hash, block = ?r.block_number, "transaction confirmed"),
        Err(e) => {
            metrics.tx_failed(op, e.kind());
            error!(target: "tx", op, error = %e, "transaction failed");
        }
    }
    outcome
}

/// Compiled contract: Hardhat (`bytecode: "0x.."`) or Foundry
/// (`bytecode: { object: "0x.." }`) output.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn from_json(raw: &Value) -> Result<Self, LaunchpadError> {
        let abi = raw
            .get("abi")
            .cloned()
            .ok_or_else(|| LaunchpadError::Artifact("missing `abi`".into()))?;
        let abi: Abi = serde_json::from_value(abi).map_err(|e| LaunchpadError::Artifact(e.to_string()))?;

        let code = match raw.get("bytecode") {
            Some(Value::String(s)) => s.as_str(),
            Some(obj) => obj
                .get("object")
                .and_then(Value::as_str)
                .ok_or_else(|| LaunchpadError::Artifact("`bytecode.object` is not a string".into()))?,
            None => return Err(LaunchpadError::Artifact("missing `bytecode`".into())),
        };
        let bytecode: Bytes = code.parse().map_err(|_| LaunchpadError::Artifact("bytecode is not hex".into()))?;
        if bytecode.is_empty() {
            return Err(LaunchpadError::Artifact("empty bytecode".into()));
        }
        Ok(Self { abi, bytecode })
    }

    pub async fn load(path: &Path) -> Result<Self, LaunchpadError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LaunchpadError::Artifact(format!("{}: {e}", path.display())))?;
        let raw: Value = serde_json::from_str(&text).map_err(|e| LaunchpadError::Artifact(e.to_string()))?;
        Self::from_json(&raw)
    }
}

/// Topic 0 of `IncreaseLiquidity(uint256,uint128,uint256,uint256)`.
pub fn increase_liquidity_topic() -> H256 {
    H256::from(ethers::utils::keccak256("IncreaseLiquidity(uint256,uint128,uint256,uint256)"))
}

/// Position id minted in this transaction, from the first
/// `IncreaseLiquidity` log emitted by `position_manager`.
pub fn minted_token_id(logs: &[Log], position_manager: Address) -> Option<U256> {
    let topic = increase_liquidity_topic();
    logs.iter()
        .filter(|l| l.address == position_manager)
        .find(|l| l.topics.first() == Some(&topic))
        .and_then(|l| l.topics.get(1))
        .map(|t| U256::from_big_endian(t.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_formats() {
        let hardhat = json!({ "abi": [], "bytecode": "0x6080" });
        assert_eq!(ContractArtifact::from_json(&hardhat).unwrap().bytecode.to_vec(), vec![0x60, 0x80]);

        let foundry = json!({ "abi": [], "bytecode": { "object": "0x6001" } });
        assert_eq!(ContractArtifact::from_json(&foundry).unwrap().bytecode.to_vec(), vec![0x60, 0x01]);

        assert!(ContractArtifact::from_json(&json!({ "abi": [] })).is_err());
        assert!(ContractArtifact::from_json(&json!({ "abi": [], "bytecode": "0x" })).is_err());
        assert!(ContractArtifact::from_json(&json!({ "abi": [], "bytecode": "zz" })).is_err());
    }

    #[test]
    fn token_id_comes_from_increase_liquidity_log() {
        let npm = Address::repeat_byte(0x11);
        let mut id = [0u8; 32];
        id[31] = 42;
        let other = Log { address: Address::repeat_byte(0x22), topics: vec![increase_liquidity_topic(), H256::repeat_byte(1)], ..Default::default() };
        let transfer = Log { address: npm, topics: vec![H256::repeat_byte(0xdd)], ..Default::default() };
        let increase = Log { address: npm, topics: vec![increase_liquidity_topic(), H256::from(id)], ..Default::default() };

        assert_eq!(minted_token_id(&[other.clone(), transfer.clone(), increase], npm), Some(U256::from(42)));
        assert_eq!(minted_token_id(&[other, transfer], npm), None);
    }

    #[test]
    fn bindings_encode_calls() {
        use ethers::{abi::AbiDecode, providers::Provider};

        let (provider, _mock) = Provider::mocked();
        let b = Bindings::new(Arc::new(provider));
        let call = b.presale(Address::repeat_byte(1)).contribute(Address::repeat_byte(2));
        let data = call.calldata().unwrap();
        let decoded = launchpad::PresaleManagerCalls::decode(data.as_ref()).unwrap();
        assert!(matches!(decoded, launchpad::PresaleManagerCalls::Contribute(c) if c.user == Address::repeat_byte(2)));
    }
}
