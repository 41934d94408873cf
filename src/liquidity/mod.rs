//! Uniswap V3 liquidity: pool check/creation, mint, swap-and-add, collect
//! and remove.
//!
//! Every operation walks [`LiquidityPhase`]; the current phase is published
//! on a watch channel for whoever renders progress. Nothing is retried
//! automatically: a failed submission returns the machine to `Ready` and the
//! error to the caller.

mod gateway;
pub mod math;
pub mod swap_add;

pub use gateway::{
    CollectParams, DecreaseParams, EthersLiquidityGateway, LiquidityGateway, MintOutcome, MintParams, PoolPrice,
    PositionInfo, QuoteRequest,
};

use std::{fmt, sync::Arc};

use chrono::Utc;
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{ApprovalPolicy, ChainConfig, Liquidity as LiquidityConfig},
    error::{LaunchpadError, ValidationError},
    provider::{ChainRegistry, WalletAdapter},
    units::{parse_units, Percent},
};

use math::{
    amounts_for_liquidity, apply_slippage, encode_sqrt_ratio_x96, full_range_ticks, get_sqrt_ratio_at_tick,
    max_liquidity_for_amounts, nearest_usable_tick, price_from_sqrt, FeeTier,
};
use swap_add::{build_swap_and_add_calls, plan_split, RouterMint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityPhase {
    Idle,
    CheckingPool,
    AwaitingCreationConfirmation,
    Ready,
    Submitting,
    Confirmed,
}

impl fmt::Display for LiquidityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiquidityPhase::Idle => "idle",
            LiquidityPhase::CheckingPool => "checking pool",
            LiquidityPhase::AwaitingCreationConfirmation => "awaiting pool creation",
            LiquidityPhase::Ready => "ready",
            LiquidityPhase::Submitting => "submitting",
            LiquidityPhase::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

use LiquidityPhase::*;

/// Phases from which a new operation may start.
const AT_REST: &[LiquidityPhase] = &[Idle, Ready, Confirmed, AwaitingCreationConfirmation];

struct PhaseMachine {
    tx: watch::Sender<LiquidityPhase>,
}

impl PhaseMachine {
    fn new() -> Self {
        Self { tx: watch::channel(Idle).0 }
    }

    fn current(&self) -> LiquidityPhase {
        *self.tx.borrow()
    }

    fn advance(&self, allowed: &[LiquidityPhase], next: LiquidityPhase) -> Result<(), LaunchpadError> {
        let mut refused = None;
        self.tx.send_if_modified(|phase| {
            if allowed.contains(phase) {
                debug!(target: "liquidity", from = %phase, to = %next, "phase");
                *phase = next;
                true
            } else {
                refused = Some(*phase);
                false
            }
        });
        match refused {
            Some(p) => Err(LaunchpadError::InvalidState(p.to_string())),
            None => Ok(()),
        }
    }

    /// Unconditional, for failure paths.
    fn reset_to(&self, phase: LiquidityPhase) {
        self.tx.send_replace(phase);
    }
}

/// ERC-20 with the decimals needed to parse human amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token {
    pub address: Address,
    pub decimals: u8,
}

impl Token {
    pub fn new(address: Address, decimals: u8) -> Self {
        Self { address, decimals }
    }
}

/// A pool by its unordered token pair and fee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolKey {
    pub chain_id: u64,
    pub token_a: Token,
    pub token_b: Token,
    pub fee: FeeTier,
}

impl PoolKey {
    /// `(token0, token1)` in pool order, and whether `token_a` is token0.
    pub fn sorted(&self) -> Result<(Token, Token, bool), LaunchpadError> {
        if self.token_a.address == self.token_b.address {
            return Err(ValidationError::DuplicateAddress(self.token_a.address).into());
        }
        Ok(if self.token_a.address < self.token_b.address {
            (self.token_a, self.token_b, true)
        } else {
            (self.token_b, self.token_a, false)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PoolStatus {
    Exists { pool: Address },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolState {
    pub pool: Address,
    pub token0: Address,
    pub token1: Address,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// Human-unit price of token0 in token1.
    pub price_token1_per_token0: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCreation {
    pub pool: Address,
    /// `None` when the pool already existed.
    pub tx_hash: Option<H256>,
}

/// Initial price as "`amount_b` of token B per `amount_a` of token A".
#[derive(Debug, Clone)]
pub struct CreatePoolRequest {
    pub pool: PoolKey,
    pub amount_a: String,
    pub amount_b: String,
}

#[derive(Debug, Clone)]
pub struct AddLiquidityRequest {
    pub pool: PoolKey,
    pub amount_a: String,
    pub amount_b: String,
    /// Defaults to the configured tolerance.
    pub slippage_bps: Option<u32>,
    /// Defaults to the full range.
    pub ticks: Option<(i32, i32)>,
    /// Defaults to the connected wallet.
    pub recipient: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct SwapAndAddRequest {
    pub pool: PoolKey,
    pub input: Token,
    pub amount_in: String,
    pub slippage_bps: Option<u32>,
    pub ticks: Option<(i32, i32)>,
    pub recipient: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct RemoveLiquidityRequest {
    pub chain_id: u64,
    pub token_id: U256,
    /// Share of the position's liquidity, `0 < fraction <= 1`.
    pub fraction: f64,
    /// Collect owed tokens and fees in the same transaction.
    pub collect: bool,
    pub slippage_bps: Option<u32>,
}

pub struct LiquidityOrchestrator<G> {
    gateway: G,
    registry: Arc<ChainRegistry>,
    wallet: Arc<WalletAdapter>,
    settings: LiquidityConfig,
    phase: PhaseMachine,
    clock: fn() -> i64,
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

impl<G: LiquidityGateway> LiquidityOrchestrator<G> {
    pub fn new(gateway: G, registry: Arc<ChainRegistry>, wallet: Arc<WalletAdapter>, settings: LiquidityConfig) -> Self {
        Self { gateway, registry, wallet, settings, phase: PhaseMachine::new(), clock: now_secs }
    }

    /// Override wall-clock seconds.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> LiquidityPhase {
        self.phase.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiquidityPhase> {
        self.phase.tx.subscribe()
    }

    fn chain(&self, chain_id: u64) -> Result<&ChainConfig, LaunchpadError> {
        self.registry.get(chain_id)
    }

    fn deadline(&self) -> u64 {
        let deadline = (self.clock)().max(0) as u64;
        deadline + self.settings.deadline.as_secs()
    }

    fn slippage(&self, requested: Option<u32>) -> Result<u32, LaunchpadError> {
        let bps = requested.unwrap_or(self.settings.slippage_bps);
        if bps > 10_000 {
            return Err(ValidationError::OutOfRange(format!("slippage {bps} bps")).into());
        }
        Ok(bps)
    }

    fn ticks(&self, key: &PoolKey, requested: Option<(i32, i32)>) -> Result<(i32, i32), LaunchpadError> {
        let fee = key.fee.fee();
        match requested {
            None => full_range_ticks(fee),
            Some((lower, upper)) => {
                let spacing = key.fee.tick_spacing();
                let (lower, upper) = (nearest_usable_tick(lower, spacing)?, nearest_usable_tick(upper, spacing)?);
                if lower >= upper {
                    return Err(ValidationError::OutOfRange(format!("tick range {lower}..{upper}")).into());
                }
                Ok((lower, upper))
            }
        }
    }

    async fn lookup(&self, key: &PoolKey) -> Result<Option<Address>, LaunchpadError> {
        let (t0, t1, _) = key.sorted()?;
        let factory = self.chain(key.chain_id)?.uniswap.factory;
        self.gateway.get_pool(key.chain_id, factory, t0.address, t1.address, key.fee.fee()).await
    }

    /// Factory lookup. Moves to `Ready` or `AwaitingCreationConfirmation`.
    #[instrument(skip_all, fields(chain_id = key.chain_id, fee = %key.fee))]
    pub async fn check_pool(&self, key: &PoolKey) -> Result<PoolStatus, LaunchpadError> {
        self.phase.advance(AT_REST, CheckingPool)?;
        match self.lookup(key).await {
            Ok(Some(pool)) => {
                self.phase.advance(&[CheckingPool], Ready)?;
                Ok(PoolStatus::Exists { pool })
            }
            Ok(None) => {
                self.phase.advance(&[CheckingPool], AwaitingCreationConfirmation)?;
                info!(target: "liquidity", "pool does not exist");
                Ok(PoolStatus::Missing)
            }
            Err(e) => {
                self.phase.reset_to(Idle);
                Err(e)
            }
        }
    }

    /// Pool address and current price, without touching the phase.
    pub async fn pool_state(&self, key: &PoolKey) -> Result<Option<PoolState>, LaunchpadError> {
        let Some(pool) = self.lookup(key).await? else {
            return Ok(None);
        };
        let (t0, t1, _) = key.sorted()?;
        let price = self.gateway.slot0(key.chain_id, pool).await?;
        Ok(Some(PoolState {
            pool,
            token0: t0.address,
            token1: t1.address,
            sqrt_price_x96: price.sqrt_price_x96,
            tick: price.tick,
            price_token1_per_token0: price_from_sqrt(price.sqrt_price_x96, t0.decimals, t1.decimals),
        }))
    }

    async fn require_pool(&self, key: &PoolKey) -> Result<Address, LaunchpadError> {
        match self.check_pool(key).await? {
            PoolStatus::Exists { pool } => Ok(pool),
            PoolStatus::Missing => Err(LaunchpadError::PoolMissing),
        }
    }

    /// Runs `submit` in the `Submitting` phase and settles the outcome.
    async fn submitting<T, F>(&self, from: &[LiquidityPhase], submit: F) -> Result<T, LaunchpadError>
    where
        F: std::future::Future<Output = Result<T, LaunchpadError>>,
    {
        self.phase.advance(from, Submitting)?;
        match submit.await {
            Ok(v) => {
                self.phase.reset_to(Confirmed);
                Ok(v)
            }
            Err(e) => {
                warn!(target: "liquidity", error = %e, "liquidity transaction failed");
                self.phase.reset_to(Ready);
                Err(e)
            }
        }
    }

    /// Create and initialize the pool at the price given by the two amounts.
    #[instrument(skip_all, fields(chain_id = req.pool.chain_id, fee = %req.pool.fee))]
    pub async fn create_pool(&self, req: &CreatePoolRequest) -> Result<PoolCreation, LaunchpadError> {
        self.wallet.require_address()?;
        let key = &req.pool;
        let (t0, _, a_is_0) = key.sorted()?;
        let amount_a = parse_units(&req.amount_a, key.token_a.decimals)?;
        let amount_b = parse_units(&req.amount_b, key.token_b.decimals)?;
        let (amount0, amount1) = if a_is_0 { (amount_a, amount_b) } else { (amount_b, amount_a) };
        let sqrt_price = encode_sqrt_ratio_x96(amount1, amount0)?;

        if let PoolStatus::Exists { pool } = self.check_pool(key).await? {
            return Ok(PoolCreation { pool, tx_hash: None });
        }
        let (_, t1, _) = key.sorted()?;
        let chain = self.chain(key.chain_id)?;
        let npm = chain.uniswap.position_manager;
        let created = self
            .submitting(&[AwaitingCreationConfirmation], async {
                let receipt = self
                    .gateway
                    .create_pool(key.chain_id, npm, t0.address, t1.address, key.fee.fee(), sqrt_price)
                    .await?;
                let pool = self.lookup(key).await?.ok_or(LaunchpadError::PoolMissing)?;
                Ok(PoolCreation { pool, tx_hash: Some(receipt.tx_hash) })
            })
            .await?;
        info!(target: "liquidity", pool = ?created.pool, "pool created");
        Ok(created)
    }

    /// Approve `spender` for `needed` of `token` unless the allowance already
    /// covers it. Returns the approval hash when one was sent.
    pub async fn ensure_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        needed: U256,
        policy: ApprovalPolicy,
    ) -> Result<Option<H256>, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        let current = self.gateway.allowance(chain_id, token, owner, spender).await?;
        if current >= needed {
            return Ok(None);
        }
        let amount = match policy {
            ApprovalPolicy::Infinite => U256::MAX,
            ApprovalPolicy::Exact => needed,
        };
        let receipt = self.gateway.approve(chain_id, token, spender, amount).await?;
        info!(target: "liquidity", ?token, ?spender, "allowance raised");
        Ok(Some(receipt.tx_hash))
    }

    /// Mint a new position. Full range and the configured slippage unless
    /// the request says otherwise.
    #[instrument(skip_all, fields(chain_id = req.pool.chain_id, fee = %req.pool.fee))]
    pub async fn add_liquidity(&self, req: &AddLiquidityRequest) -> Result<MintOutcome, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        let key = &req.pool;
        let (t0, t1, a_is_0) = key.sorted()?;
        let slippage = self.slippage(req.slippage_bps)?;
        let (tick_lower, tick_upper) = self.ticks(key, req.ticks)?;
        let amount_a = parse_units(&req.amount_a, key.token_a.decimals)?;
        let amount_b = parse_units(&req.amount_b, key.token_b.decimals)?;
        let (amount0, amount1) = if a_is_0 { (amount_a, amount_b) } else { (amount_b, amount_a) };
        if amount0.is_zero() && amount1.is_zero() {
            return Err(ValidationError::InvalidAmount("0".into()).into());
        }

        let pool = self.require_pool(key).await?;
        let npm = self.chain(key.chain_id)?.uniswap.position_manager;

        let result = async {
            let price = self.gateway.slot0(key.chain_id, pool).await?;
            let (sqrt_a, sqrt_b) = (get_sqrt_ratio_at_tick(tick_lower)?, get_sqrt_ratio_at_tick(tick_upper)?);
            let liquidity = max_liquidity_for_amounts(price.sqrt_price_x96, sqrt_a, sqrt_b, amount0, amount1)?;
            if liquidity == 0 {
                return Err(ValidationError::InvalidAmount("amounts too small for this range".into()).into());
            }
            let (used0, used1) = amounts_for_liquidity(price.sqrt_price_x96, sqrt_a, sqrt_b, liquidity)?;

            for (token, needed) in [(t0.address, amount0), (t1.address, amount1)] {
                if !needed.is_zero() {
                    self.ensure_allowance(key.chain_id, token, npm, needed, self.settings.approval).await?;
                }
            }
            Ok::<_, LaunchpadError>(MintParams {
                token0: t0.address,
                token1: t1.address,
                fee: key.fee.fee(),
                tick_lower,
                tick_upper,
                amount0_desired: amount0,
                amount1_desired: amount1,
                amount0_min: apply_slippage(used0, slippage)?,
                amount1_min: apply_slippage(used1, slippage)?,
                recipient: req.recipient.unwrap_or(owner),
                deadline: self.deadline(),
            })
        }
        .await;
        let params = result.map_err(|e| {
            self.phase.reset_to(Ready);
            e
        })?;

        let outcome = self.submitting(&[Ready], self.gateway.mint(key.chain_id, npm, params)).await?;
        info!(target: "liquidity", token_id = %outcome.token_id, tx_hash = ?outcome.tx_hash, "position minted");
        Ok(outcome)
    }

    /// Swap a single token into both sides of the pool and mint, atomically.
    #[instrument(skip_all, fields(chain_id = req.pool.chain_id, fee = %req.pool.fee))]
    pub async fn swap_and_add(&self, req: &SwapAndAddRequest) -> Result<MintOutcome, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        let key = &req.pool;
        let (t0, t1, _) = key.sorted()?;
        let slippage = self.slippage(req.slippage_bps)?;
        let (tick_lower, tick_upper) = self.ticks(key, req.ticks)?;
        let amount_in = parse_units(&req.amount_in, req.input.decimals)?;
        if amount_in.is_zero() {
            return Err(ValidationError::InvalidAmount(req.amount_in.clone()).into());
        }

        let pool = self.require_pool(key).await?;
        let chain = self.chain(key.chain_id)?;
        let (router, npm, quoter) = (chain.uniswap.swap_router, chain.uniswap.position_manager, chain.uniswap.quoter);
        let fee = key.fee.fee();

        let prepared = async {
            let price = self.gateway.slot0(key.chain_id, pool).await?;
            let (sqrt_a, sqrt_b) = (get_sqrt_ratio_at_tick(tick_lower)?, get_sqrt_ratio_at_tick(tick_upper)?);
            let plan = plan_split(req.input.address, t0.address, t1.address, amount_in, price.sqrt_price_x96, sqrt_a, sqrt_b)?;

            // expected router balances after the swaps
            let (mut held0, mut held1) = (U256::zero(), U256::zero());
            let mut min_outs = Vec::with_capacity(plan.legs.len());
            for leg in &plan.legs {
                let out = self
                    .gateway
                    .quote(
                        key.chain_id,
                        quoter,
                        QuoteRequest { token_in: leg.token_in, token_out: leg.token_out, fee, amount_in: leg.amount_in },
                    )
                    .await?;
                min_outs.push(apply_slippage(out, slippage)?);
                if leg.token_out == t0.address {
                    held0 += out;
                } else {
                    held1 += out;
                }
            }
            if let Some((token, kept)) = plan.kept {
                if token == t0.address {
                    held0 += kept;
                } else {
                    held1 += kept;
                }
            }
            let liquidity = max_liquidity_for_amounts(price.sqrt_price_x96, sqrt_a, sqrt_b, held0, held1)?;
            let (used0, used1) = amounts_for_liquidity(price.sqrt_price_x96, sqrt_a, sqrt_b, liquidity)?;

            self.ensure_allowance(key.chain_id, req.input.address, router, amount_in, self.settings.approval)
                .await?;
            let mint = RouterMint {
                token0: t0.address,
                token1: t1.address,
                fee,
                tick_lower,
                tick_upper,
                amount0_min: apply_slippage(used0, slippage)?,
                amount1_min: apply_slippage(used1, slippage)?,
                recipient: req.recipient.unwrap_or(owner),
            };
            build_swap_and_add_calls(&plan, &min_outs, fee, &mint)
        }
        .await;
        let calls = prepared.map_err(|e| {
            self.phase.reset_to(Ready);
            e
        })?;

        let deadline = self.deadline();
        let outcome = self
            .submitting(&[Ready], self.gateway.router_multicall(key.chain_id, router, npm, deadline, calls))
            .await?;
        info!(target: "liquidity", token_id = %outcome.token_id, tx_hash = ?outcome.tx_hash, "swap and add confirmed");
        Ok(outcome)
    }

    /// Collect everything owed to the position into the connected wallet.
    #[instrument(skip(self))]
    pub async fn collect_fees(&self, chain_id: u64, token_id: U256) -> Result<H256, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        let npm = self.chain(chain_id)?.uniswap.position_manager;
        let params = CollectParams { token_id, recipient: owner };
        let receipt = self.submitting(AT_REST, self.gateway.collect(chain_id, npm, params)).await?;
        Ok(receipt.tx_hash)
    }

    /// Withdraw `fraction` of the position's liquidity.
    #[instrument(skip_all, fields(chain_id = req.chain_id, token_id = %req.token_id, fraction = req.fraction))]
    pub async fn remove_liquidity(&self, req: &RemoveLiquidityRequest) -> Result<H256, LaunchpadError> {
        let owner = self.wallet.require_address()?;
        if !(req.fraction > 0.0 && req.fraction <= 1.0) {
            return Err(ValidationError::OutOfRange(format!("fraction {}", req.fraction)).into());
        }
        let slippage = self.slippage(req.slippage_bps)?;
        let chain = self.chain(req.chain_id)?;
        let (factory, npm) = (chain.uniswap.factory, chain.uniswap.position_manager);

        let position = self.gateway.position(req.chain_id, npm, req.token_id).await?;
        let share = Percent::from_f64(req.fraction * 100.0)?;
        let liquidity = share.of(U256::from(position.liquidity))?.as_u128();
        if liquidity == 0 {
            return Err(ValidationError::InvalidAmount("position has no liquidity to remove".into()).into());
        }

        let pool = self
            .gateway
            .get_pool(req.chain_id, factory, position.token0, position.token1, position.fee)
            .await?
            .ok_or(LaunchpadError::PoolMissing)?;
        let price = self.gateway.slot0(req.chain_id, pool).await?;
        let (expected0, expected1) = amounts_for_liquidity(
            price.sqrt_price_x96,
            get_sqrt_ratio_at_tick(position.tick_lower)?,
            get_sqrt_ratio_at_tick(position.tick_upper)?,
            liquidity,
        )?;
        let params = DecreaseParams {
            token_id: req.token_id,
            liquidity,
            amount0_min: apply_slippage(expected0, slippage)?,
            amount1_min: apply_slippage(expected1, slippage)?,
            deadline: self.deadline(),
        };
        let collect = req.collect.then_some(CollectParams { token_id: req.token_id, recipient: owner });
        let receipt = self
            .submitting(AT_REST, self.gateway.decrease_liquidity(req.chain_id, npm, params, collect))
            .await?;
        Ok(receipt.tx_hash)
    }
}
