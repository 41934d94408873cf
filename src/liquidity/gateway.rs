use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::AbiEncode,
    types::{Address, Bytes, U256},
};

use crate::{
    contracts::{
        minted_token_id, read, send_tx,
        uniswap::{position_manager, QuoteExactInputSingleParams},
        Bindings, TxReceipt,
    },
    error::{LaunchpadError, TxFailure},
    metrics::Metrics,
    provider::{RpcSelector, WalletAdapter},
};

/// `slot0` fields the orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPrice {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

/// `positions(tokenId)` minus fee-growth bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionInfo {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub tokens_owed0: u128,
    pub tokens_owed1: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintParams {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub recipient: Address,
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecreaseParams {
    pub token_id: U256,
    pub liquidity: u128,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectParams {
    pub token_id: U256,
    pub recipient: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: U256,
}

/// Confirmed mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintOutcome {
    pub tx_hash: ethers::types::H256,
    pub token_id: U256,
}

/// Chain side of the liquidity flows. Addresses of the Uniswap deployment
/// are passed in by the orchestrator from the chain config.
#[async_trait]
pub trait LiquidityGateway: Send + Sync + 'static {
    /// `None` when the factory returns the zero address.
    async fn get_pool(&self, chain_id: u64, factory: Address, token0: Address, token1: Address, fee: u32)
        -> Result<Option<Address>, LaunchpadError>;
    async fn slot0(&self, chain_id: u64, pool: Address) -> Result<PoolPrice, LaunchpadError>;
    async fn position(&self, chain_id: u64, position_manager: Address, token_id: U256) -> Result<PositionInfo, LaunchpadError>;
    async fn allowance(&self, chain_id: u64, token: Address, owner: Address, spender: Address) -> Result<U256, LaunchpadError>;
    async fn quote(&self, chain_id: u64, quoter: Address, request: QuoteRequest) -> Result<U256, LaunchpadError>;

    async fn approve(&self, chain_id: u64, token: Address, spender: Address, amount: U256) -> Result<TxReceipt, LaunchpadError>;
    async fn create_pool(
        &self,
        chain_id: u64,
        position_manager: Address,
        token0: Address,
        token1: Address,
        fee: u32,
        sqrt_price_x96: U256,
    ) -> Result<TxReceipt, LaunchpadError>;
    async fn mint(&self, chain_id: u64, position_manager: Address, params: MintParams) -> Result<MintOutcome, LaunchpadError>;
    /// One `multicall(deadline, data)` on the swap router. Mints made inside
    /// it are reported through `position_manager`'s logs.
    async fn router_multicall(
        &self,
        chain_id: u64,
        router: Address,
        position_manager: Address,
        deadline: u64,
        calls: Vec<Bytes>,
    ) -> Result<MintOutcome, LaunchpadError>;
    /// `decreaseLiquidity`, plus `collect` in the same multicall when given.
    async fn decrease_liquidity(
        &self,
        chain_id: u64,
        position_manager: Address,
        params: DecreaseParams,
        collect: Option<CollectParams>,
    ) -> Result<TxReceipt, LaunchpadError>;
    async fn collect(&self, chain_id: u64, position_manager: Address, params: CollectParams) -> Result<TxReceipt, LaunchpadError>;
}

pub struct EthersLiquidityGateway {
    selector: Arc<RpcSelector>,
    wallet: Arc<WalletAdapter>,
    metrics: Arc<dyn Metrics>,
}

impl EthersLiquidityGateway {
    pub fn new(selector: Arc<RpcSelector>, wallet: Arc<WalletAdapter>, metrics: Arc<dyn Metrics>) -> Self {
        Self { selector, wallet, metrics }
    }

    async fn reader(&self, chain_id: u64) -> Result<Bindings<crate::provider::HttpProvider>, LaunchpadError> {
        Ok(Bindings::new(self.selector.read_provider(chain_id).await?.provider))
    }

    fn writer(&self, chain_id: u64) -> Result<Bindings<crate::provider::SignerClient>, LaunchpadError> {
        Ok(Bindings::new(self.wallet.session(chain_id)?))
    }
}

fn collect_call(p: CollectParams) -> position_manager::CollectCall {
    position_manager::CollectCall {
        params: position_manager::CollectParams {
            token_id: p.token_id,
            recipient: p.recipient,
            amount_0_max: u128::MAX,
            amount_1_max: u128::MAX,
        },
    }
}

fn mint_outcome(receipt: TxReceipt, position_manager: Address) -> Result<MintOutcome, LaunchpadError> {
    let token_id = minted_token_id(&receipt.logs, position_manager).ok_or_else(|| {
        LaunchpadError::Chain(TxFailure::Unknown {
            raw: format!("transaction {:?} minted no position", receipt.tx_hash),
        })
    })?;
    Ok(MintOutcome { tx_hash: receipt.tx_hash, token_id })
}

#[async_trait]
impl LiquidityGateway for EthersLiquidityGateway {
    async fn get_pool(
        &self,
        chain_id: u64,
        factory: Address,
        token0: Address,
        token1: Address,
        fee: u32,
    ) -> Result<Option<Address>, LaunchpadError> {
        let pool = read(self.reader(chain_id).await?.factory(factory).get_pool(token0, token1, fee)).await?;
        Ok((!pool.is_zero()).then_some(pool))
    }

    async fn slot0(&self, chain_id: u64, pool: Address) -> Result<PoolPrice, LaunchpadError> {
        let (sqrt_price_x96, tick, ..) = read(self.reader(chain_id).await?.pool(pool).slot_0()).await?;
        Ok(PoolPrice { sqrt_price_x96, tick })
    }

    async fn position(&self, chain_id: u64, npm: Address, token_id: U256) -> Result<PositionInfo, LaunchpadError> {
        let (_, _, token0, token1, fee, tick_lower, tick_upper, liquidity, _, _, tokens_owed0, tokens_owed1) =
            read(self.reader(chain_id).await?.position_manager(npm).positions(token_id)).await?;
        Ok(PositionInfo { token0, token1, fee, tick_lower, tick_upper, liquidity, tokens_owed0, tokens_owed1 })
    }

    async fn allowance(&self, chain_id: u64, token: Address, owner: Address, spender: Address) -> Result<U256, LaunchpadError> {
        read(self.reader(chain_id).await?.token(token).allowance(owner, spender)).await
    }

    async fn quote(&self, chain_id: u64, quoter: Address, q: QuoteRequest) -> Result<U256, LaunchpadError> {
        // QuoterV2 is non-view; eth_call it.
        let call = self
            .reader(chain_id)
            .await?
            .quoter(quoter)
            .quote_exact_input_single(QuoteExactInputSingleParams {
                token_in: q.token_in,
                token_out: q.token_out,
                amount_in: q.amount_in,
                fee: q.fee,
                sqrt_price_limit_x96: U256::zero(),
            });
        let (amount_out, ..) = read(call).await?;
        Ok(amount_out)
    }

    async fn approve(&self, chain_id: u64, token: Address, spender: Address, amount: U256) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id)?.token(token).approve(spender, amount);
        send_tx("approve", call, &*self.metrics).await
    }

    async fn create_pool(
        &self,
        chain_id: u64,
        npm: Address,
        token0: Address,
        token1: Address,
        fee: u32,
        sqrt_price_x96: U256,
    ) -> Result<TxReceipt, LaunchpadError> {
        let call = self
            .writer(chain_id)?
            .position_manager(npm)
            .create_and_initialize_pool_if_necessary(token0, token1, fee, sqrt_price_x96);
        send_tx("create_pool", call, &*self.metrics).await
    }

    async fn mint(&self, chain_id: u64, npm: Address, p: MintParams) -> Result<MintOutcome, LaunchpadError> {
        let call = self.writer(chain_id)?.position_manager(npm).mint(position_manager::MintParams {
            token_0: p.token0,
            token_1: p.token1,
            fee: p.fee,
            tick_lower: p.tick_lower,
            tick_upper: p.tick_upper,
            amount_0_desired: p.amount0_desired,
            amount_1_desired: p.amount1_desired,
            amount_0_min: p.amount0_min,
            amount_1_min: p.amount1_min,
            recipient: p.recipient,
            deadline: p.deadline.into(),
        });
        mint_outcome(send_tx("mint_position", call, &*self.metrics).await?, npm)
    }

    async fn router_multicall(
        &self,
        chain_id: u64,
        router: Address,
        npm: Address,
        deadline: u64,
        calls: Vec<Bytes>,
    ) -> Result<MintOutcome, LaunchpadError> {
        let call = self.writer(chain_id)?.router(router).multicall(deadline.into(), calls);
        mint_outcome(send_tx("swap_and_add", call, &*self.metrics).await?, npm)
    }

    async fn decrease_liquidity(
        &self,
        chain_id: u64,
        npm: Address,
        p: DecreaseParams,
        collect: Option<CollectParams>,
    ) -> Result<TxReceipt, LaunchpadError> {
        let decrease = position_manager::DecreaseLiquidityCall {
            params: position_manager::DecreaseLiquidityParams {
                token_id: p.token_id,
                liquidity: p.liquidity,
                amount_0_min: p.amount0_min,
                amount_1_min: p.amount1_min,
                deadline: p.deadline.into(),
            },
        };
        let mut data: Vec<Bytes> = vec![decrease.encode().into()];
        if let Some(c) = collect {
            data.push(collect_call(c).encode().into());
        }
        let call = self.writer(chain_id)?.position_manager(npm).multicall(data);
        send_tx("remove_liquidity", call, &*self.metrics).await
    }

    async fn collect(&self, chain_id: u64, npm: Address, p: CollectParams) -> Result<TxReceipt, LaunchpadError> {
        let call = self.writer(chain_id)?.position_manager(npm).collect(collect_call(p).params);
        send_tx("collect_fees", call, &*self.metrics).await
    }
}
