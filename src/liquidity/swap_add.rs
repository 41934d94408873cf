//! Swap-and-add: split a single input token into the two sides of a
//! position and bundle the swaps and the mint into one router multicall.

use ethers::{
    abi::AbiEncode,
    types::{Address, Bytes, U256},
};

use super::math::{amounts_for_liquidity, mul_div, q96};
use crate::{contracts::uniswap::router, error::LaunchpadError};

/// Router sentinel for "the router itself" as swap recipient.
pub fn address_this() -> Address {
    Address::from_low_u64_be(2)
}

/// Nominal liquidity used to read the position's token ratio.
const PROBE_LIQUIDITY: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapLeg {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub legs: Vec<SwapLeg>,
    /// Portion of the input that goes into the position unswapped.
    pub kept: Option<(Address, U256)>,
}

/// Value of `r1` token1 units in token0 at `sqrt_price`.
fn token1_in_token0(r1: U256, sqrt_price: U256) -> Result<U256, LaunchpadError> {
    mul_div(mul_div(r1, q96(), sqrt_price)?, q96(), sqrt_price)
}

/// Value of `r0` token0 units in token1 at `sqrt_price`.
fn token0_in_token1(r0: U256, sqrt_price: U256) -> Result<U256, LaunchpadError> {
    mul_div(mul_div(r0, sqrt_price, q96())?, sqrt_price, q96())
}

/// Decide how much of `amount_in` to swap into each side.
///
/// An input that is neither pool token is split 50/50. An input equal to one
/// of them keeps the share the position needs on that side at the current
/// price and swaps the rest.
pub fn plan_split(
    input: Address,
    token0: Address,
    token1: Address,
    amount_in: U256,
    sqrt_price: U256,
    sqrt_lower: U256,
    sqrt_upper: U256,
) -> Result<SplitPlan, LaunchpadError> {
    if amount_in.is_zero() {
        return Err(LaunchpadError::Math("zero input amount"));
    }
    if input != token0 && input != token1 {
        let half = amount_in / 2;
        return Ok(SplitPlan {
            legs: vec![
                SwapLeg { token_in: input, token_out: token0, amount_in: half },
                SwapLeg { token_in: input, token_out: token1, amount_in: amount_in - half },
            ],
            kept: None,
        });
    }

    let (r0, r1) = amounts_for_liquidity(sqrt_price, sqrt_lower, sqrt_upper, PROBE_LIQUIDITY)?;
    let (other, swap) = if input == token0 {
        let other_value = token1_in_token0(r1, sqrt_price)?;
        (token1, share(amount_in, other_value, r0 + other_value)?)
    } else {
        let other_value = token0_in_token1(r0, sqrt_price)?;
        (token0, share(amount_in, other_value, other_value + r1)?)
    };
    let keep = amount_in - swap;
    Ok(SplitPlan {
        legs: if swap.is_zero() {
            vec![]
        } else {
            vec![SwapLeg { token_in: input, token_out: other, amount_in: swap }]
        },
        kept: (!keep.is_zero()).then_some((input, keep)),
    })
}

fn share(amount: U256, part: U256, whole: U256) -> Result<U256, LaunchpadError> {
    if whole.is_zero() {
        return Err(LaunchpadError::Math("position has no value at this price"));
    }
    mul_div(amount, part, whole)
}

/// Router-side mint parameters; amounts come from the router's own balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterMint {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub recipient: Address,
}

/// Inner calls of the swap-and-add multicall, in execution order:
/// swaps into the router, pull of the kept input, approvals, mint, then
/// sweeping leftovers of both tokens back to the recipient.
///
/// `min_outs[i]` is the minimum output of `plan.legs[i]`.
pub fn build_swap_and_add_calls(
    plan: &SplitPlan,
    min_outs: &[U256],
    fee: u32,
    mint: &RouterMint,
) -> Result<Vec<Bytes>, LaunchpadError> {
    if min_outs.len() != plan.legs.len() {
        return Err(LaunchpadError::InvalidState("one minimum output per swap leg".into()));
    }
    let mut calls: Vec<Bytes> = Vec::with_capacity(plan.legs.len() + 6);
    for (leg, min_out) in plan.legs.iter().zip(min_outs) {
        calls.push(
            router::ExactInputSingleCall {
                params: router::ExactInputSingleParams {
                    token_in: leg.token_in,
                    token_out: leg.token_out,
                    fee,
                    recipient: address_this(),
                    amount_in: leg.amount_in,
                    amount_out_minimum: *min_out,
                    sqrt_price_limit_x96: U256::zero(),
                },
            }
            .encode()
            .into(),
        );
    }
    if let Some((token, value)) = plan.kept {
        calls.push(router::PullCall { token, value }.encode().into());
    }
    for token in [mint.token0, mint.token1] {
        calls.push(router::ApproveMaxCall { token }.encode().into());
    }
    calls.push(
        router::MintCall {
            params: router::MintParams {
                token_0: mint.token0,
                token_1: mint.token1,
                fee: mint.fee,
                tick_lower: mint.tick_lower,
                tick_upper: mint.tick_upper,
                amount_0_min: mint.amount0_min,
                amount_1_min: mint.amount1_min,
                recipient: mint.recipient,
            },
        }
        .encode()
        .into(),
    );
    for token in [mint.token0, mint.token1] {
        calls.push(
            router::SweepTokenCall { token, amount_minimum: U256::zero(), recipient: mint.recipient }
                .encode()
                .into(),
        );
    }
    Ok(calls)
}

/// Outer `multicall(deadline, data)` calldata.
pub fn wrap_multicall(deadline: u64, calls: Vec<Bytes>) -> Bytes {
    router::MulticallCall { deadline: deadline.into(), data: calls }.encode().into()
}
