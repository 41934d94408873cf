//! Uniswap V3 fixed-point math: tick ↔ sqrt price and liquidity ↔ amounts.
//!
//! All arithmetic is integer (`U256`, widened to `U512` for products) and
//! rounds the way the periphery contracts do.

use std::fmt;

use ethers::types::{U256, U512};
use serde::Serialize;

use crate::{error::LaunchpadError, units::Percent};

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// `get_sqrt_ratio_at_tick(MIN_TICK)`.
pub fn min_sqrt_ratio() -> U256 {
    U256::from(4_295_128_739u64)
}

/// `get_sqrt_ratio_at_tick(MAX_TICK)`.
pub fn max_sqrt_ratio() -> U256 {
    U256::from_dec_str("1461446703485210103287273052203988822378723970342").unwrap_or_default()
}

/// 2^96.
pub fn q96() -> U256 {
    U256::one() << 96
}

const BPS: u32 = 10_000;

/// Pool fee in hundredths of a bip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum FeeTier {
    /// 0.05%
    Low,
    /// 0.3%
    #[default]
    Medium,
    /// 1%
    High,
}

impl FeeTier {
    pub fn fee(self) -> u32 {
        match self {
            FeeTier::Low => 500,
            FeeTier::Medium => 3000,
            FeeTier::High => 10_000,
        }
    }

    pub fn from_fee(fee: u32) -> Option<Self> {
        match fee {
            500 => Some(FeeTier::Low),
            3000 => Some(FeeTier::Medium),
            10_000 => Some(FeeTier::High),
            _ => None,
        }
    }

    pub fn tick_spacing(self) -> i32 {
        tick_spacing(self.fee())
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeeTier::Low => "0.05%",
            FeeTier::Medium => "0.3%",
            FeeTier::High => "1%",
        };
        f.write_str(label)
    }
}

/// `"0.05"` → 500, `"0.3"` → 3000, `"1"` → 10000 (a trailing `%` is
/// accepted). Anything else is 3000.
pub fn convert_fee_tier(input: &str) -> FeeTier {
    // a fee percentage in ppm is exactly the pool fee value
    input
        .parse::<Percent>()
        .ok()
        .and_then(|p| u32::try_from(p.ppm()).ok())
        .and_then(FeeTier::from_fee)
        .unwrap_or_default()
}

pub fn tick_spacing(fee: u32) -> i32 {
    match fee {
        500 => 10,
        3000 => 60,
        _ => 200,
    }
}

fn math_err(what: &'static str) -> LaunchpadError {
    LaunchpadError::Math(what)
}

/// `a * b / denominator`, rounded down, with a 512-bit intermediate.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, LaunchpadError> {
    if denominator.is_zero() {
        return Err(math_err("division by zero"));
    }
    let q = a.full_mul(b) / U512::from(denominator);
    U256::try_from(q).map_err(|_| math_err("mul_div overflow"))
}

pub fn mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> Result<U256, LaunchpadError> {
    if denominator.is_zero() {
        return Err(math_err("division by zero"));
    }
    let product = a.full_mul(b);
    let d = U512::from(denominator);
    let mut q = product / d;
    if !(product % d).is_zero() {
        q += U512::one();
    }
    U256::try_from(q).map_err(|_| math_err("mul_div overflow"))
}

const TICK_FACTORS: [(u32, u128); 19] = [
    (0x2, 0xfff97272373d413259a46990580e213a),
    (0x4, 0xfff2e50f5f656932ef12357cf3c7fdcc),
    (0x8, 0xffe5caca7e10e4e61c3624eaa0941cd0),
    (0x10, 0xffcb9843d60f6159c9db58835c926644),
    (0x20, 0xff973b41fa98c081472e6896dfb254c0),
    (0x40, 0xff2ea16466c96a3843ec78b326b52861),
    (0x80, 0xfe5dee046a99a2a811c461f1969c3053),
    (0x100, 0xfcbe86c7900a88aedcffc83b479aa3a4),
    (0x200, 0xf987a7253ac413176f2b074cf7815e54),
    (0x400, 0xf3392b0822b70005940c7a398e4b70f3),
    (0x800, 0xe7159475a2c29b7443b29c7fa6e889d9),
    (0x1000, 0xd097f3bdfd2022b8845ad8f792aa5825),
    (0x2000, 0xa9f746462d870fdf8a65dc1f90e061e5),
    (0x4000, 0x70d869a156d2a1b890bb3df62baf32f7),
    (0x8000, 0x31be135f97d08fd981231505542fcfa6),
    (0x10000, 0x9aa508b5b7a84e1c677de54f3e99bc9),
    (0x20000, 0x5d6af8dedb81196699c329225ee604),
    (0x40000, 0x2216e584f5fa1ea926041bedfe98),
    (0x80000, 0x48a170391f7dc42444e8fa2),
];

/// `sqrt(1.0001^tick) * 2^96`, bit-exact with `TickMath.getSqrtRatioAtTick`.
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, LaunchpadError> {
    let abs = tick.unsigned_abs();
    if abs > MAX_TICK as u32 {
        return Err(math_err("tick out of range"));
    }
    let mut ratio = if abs & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        U256::one() << 128
    };
    for (bit, factor) in TICK_FACTORS {
        if abs & bit != 0 {
            ratio = (ratio * U256::from(factor)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }
    let round_up = !(ratio & U256::from(u32::MAX)).is_zero();
    Ok((ratio >> 32) + if round_up { U256::one() } else { U256::zero() })
}

/// Nearest multiple of `spacing` to `tick` (halves round up), kept inside
/// `[MIN_TICK, MAX_TICK]`.
pub fn nearest_usable_tick(tick: i32, spacing: i32) -> Result<i32, LaunchpadError> {
    if spacing <= 0 {
        return Err(math_err("tick spacing must be positive"));
    }
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(math_err("tick out of range"));
    }
    let (q, r) = (tick.div_euclid(spacing), tick.rem_euclid(spacing));
    let rounded = if r * 2 >= spacing { (q + 1) * spacing } else { q * spacing };
    Ok(if rounded < MIN_TICK {
        rounded + spacing
    } else if rounded > MAX_TICK {
        rounded - spacing
    } else {
        rounded
    })
}

/// Widest usable range for `fee`.
pub fn full_range_ticks(fee: u32) -> Result<(i32, i32), LaunchpadError> {
    let spacing = tick_spacing(fee);
    Ok((nearest_usable_tick(MIN_TICK, spacing)?, nearest_usable_tick(MAX_TICK, spacing)?))
}

/// `multiplier` tick spacings either side of `current`, snapped to usable ticks.
pub fn tick_range(current: i32, fee: u32, multiplier: u32) -> Result<(i32, i32), LaunchpadError> {
    if multiplier == 0 {
        return Err(math_err("range multiplier must be positive"));
    }
    let spacing = tick_spacing(fee);
    let width = i64::from(spacing) * i64::from(multiplier);
    let clamp = |t: i64| t.clamp(i64::from(MIN_TICK), i64::from(MAX_TICK)) as i32;
    let lower = nearest_usable_tick(clamp(i64::from(current) - width), spacing)?;
    let upper = nearest_usable_tick(clamp(i64::from(current) + width), spacing)?;
    if lower >= upper {
        return Err(math_err("empty tick range"));
    }
    Ok((lower, upper))
}

/// `sqrt(amount1 / amount0) * 2^96`.
pub fn encode_sqrt_ratio_x96(amount1: U256, amount0: U256) -> Result<U256, LaunchpadError> {
    if amount0.is_zero() {
        return Err(math_err("division by zero"));
    }
    let ratio_x192 = (U512::from(amount1) << 192) / U512::from(amount0);
    let root = U256::try_from(ratio_x192.integer_sqrt()).map_err(|_| math_err("price out of range"))?;
    if root < min_sqrt_ratio() || root >= max_sqrt_ratio() {
        return Err(math_err("price out of range"));
    }
    Ok(root)
}

fn sorted(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

fn to_u128(v: U256) -> Result<u128, LaunchpadError> {
    if v > U256::from(u128::MAX) {
        return Err(math_err("liquidity overflow"));
    }
    Ok(v.as_u128())
}

fn liquidity_for_amount0(a: U256, b: U256, amount0: U256) -> Result<U256, LaunchpadError> {
    let intermediate = mul_div(a, b, q96())?;
    mul_div(amount0, intermediate, b - a)
}

fn liquidity_for_amount1(a: U256, b: U256, amount1: U256) -> Result<U256, LaunchpadError> {
    mul_div(amount1, q96(), b - a)
}

/// Largest liquidity that `amount0` and `amount1` can fund for the range
/// `[sqrt_a, sqrt_b]` at `sqrt_price`.
pub fn max_liquidity_for_amounts(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    amount0: U256,
    amount1: U256,
) -> Result<u128, LaunchpadError> {
    let (a, b) = sorted(sqrt_a, sqrt_b);
    if a == b {
        return Err(math_err("empty tick range"));
    }
    let liquidity = if sqrt_price <= a {
        liquidity_for_amount0(a, b, amount0)?
    } else if sqrt_price < b {
        liquidity_for_amount0(sqrt_price, b, amount0)?.min(liquidity_for_amount1(a, sqrt_price, amount1)?)
    } else {
        liquidity_for_amount1(a, b, amount1)?
    };
    to_u128(liquidity)
}

fn amount0_delta(a: U256, b: U256, liquidity: u128) -> Result<U256, LaunchpadError> {
    let numerator = U256::from(liquidity) << 96;
    Ok(mul_div(numerator, b - a, b)? / a)
}

fn amount1_delta(a: U256, b: U256, liquidity: u128) -> Result<U256, LaunchpadError> {
    mul_div(U256::from(liquidity), b - a, q96())
}

/// Token amounts represented by `liquidity` at `sqrt_price`, rounded down.
pub fn amounts_for_liquidity(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: u128,
) -> Result<(U256, U256), LaunchpadError> {
    let (a, b) = sorted(sqrt_a, sqrt_b);
    if a.is_zero() {
        return Err(math_err("zero sqrt price"));
    }
    if sqrt_price <= a {
        Ok((amount0_delta(a, b, liquidity)?, U256::zero()))
    } else if sqrt_price < b {
        Ok((amount0_delta(sqrt_price, b, liquidity)?, amount1_delta(a, sqrt_price, liquidity)?))
    } else {
        Ok((U256::zero(), amount1_delta(a, b, liquidity)?))
    }
}

/// Lower bound after `bps` of slippage.
pub fn apply_slippage(amount: U256, bps: u32) -> Result<U256, LaunchpadError> {
    let keep = BPS.saturating_sub(bps);
    mul_div(amount, U256::from(keep), U256::from(BPS))
}

fn u256_to_f64(v: U256) -> f64 {
    v.0.iter().rev().fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

/// Human price of token0 in token1.
pub fn price_from_sqrt(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    let ratio = u256_to_f64(sqrt_price_x96) / 2f64.powi(96);
    ratio * ratio * 10f64.powi(i32::from(decimals0) - i32::from(decimals1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_tier_conversion() {
        assert_eq!(convert_fee_tier("0.05"), FeeTier::Low);
        assert_eq!(convert_fee_tier("0.05%"), FeeTier::Low);
        assert_eq!(convert_fee_tier("0.3"), FeeTier::Medium);
        assert_eq!(convert_fee_tier("1"), FeeTier::High);
        assert_eq!(convert_fee_tier("1%").fee(), 10_000);
        assert_eq!(convert_fee_tier("2"), FeeTier::Medium);
        assert_eq!(convert_fee_tier("cheap"), FeeTier::Medium);
    }

    #[test]
    fn spacing_by_fee() {
        assert_eq!(tick_spacing(500), 10);
        assert_eq!(tick_spacing(3000), 60);
        assert_eq!(tick_spacing(10_000), 200);
        assert_eq!(tick_spacing(100), 200);
    }

    #[test]
    fn sqrt_ratio_matches_tick_math() {
        assert_eq!(get_sqrt_ratio_at_tick(0).unwrap(), q96());
        assert_eq!(get_sqrt_ratio_at_tick(MIN_TICK).unwrap(), min_sqrt_ratio());
        assert_eq!(get_sqrt_ratio_at_tick(MAX_TICK).unwrap(), max_sqrt_ratio());
        assert!(get_sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(get_sqrt_ratio_at_tick(MIN_TICK - 1).is_err());

        let up = get_sqrt_ratio_at_tick(1).unwrap();
        let down = get_sqrt_ratio_at_tick(-1).unwrap();
        assert!(down < q96() && q96() < up);
    }

    #[test]
    fn usable_ticks() {
        assert_eq!(nearest_usable_tick(5, 10).unwrap(), 10);
        assert_eq!(nearest_usable_tick(4, 10).unwrap(), 0);
        assert_eq!(nearest_usable_tick(-5, 10).unwrap(), 0);
        assert_eq!(nearest_usable_tick(-6, 10).unwrap(), -10);
        assert_eq!(nearest_usable_tick(MIN_TICK, 60).unwrap(), -887_220);
        assert_eq!(nearest_usable_tick(MAX_TICK, 60).unwrap(), 887_220);
        assert_eq!(full_range_ticks(500).unwrap(), (-887_270, 887_270));
        assert_eq!(full_range_ticks(10_000).unwrap(), (-887_200, 887_200));
    }

    #[test]
    fn symmetric_range_around_current_tick() {
        assert_eq!(tick_range(1000, 3000, 10).unwrap(), (420, 1620));
        assert_eq!(tick_range(-15, 500, 2).unwrap(), (-30, 10));
        let (lo, hi) = tick_range(MAX_TICK - 10, 3000, 100).unwrap();
        assert!(lo < hi && hi <= MAX_TICK);
        assert!(tick_range(0, 3000, 0).is_err());
    }

    #[test]
    fn encode_price() {
        assert_eq!(encode_sqrt_ratio_x96(U256::one(), U256::one()).unwrap(), q96());
        assert_eq!(encode_sqrt_ratio_x96(U256::from(100), U256::one()).unwrap(), q96() * 10);
        assert_eq!(encode_sqrt_ratio_x96(U256::one(), U256::from(4)).unwrap(), q96() / 2);
        assert!(encode_sqrt_ratio_x96(U256::one(), U256::zero()).is_err());
    }

    #[test]
    fn liquidity_round_trip_stays_within_inputs() {
        let price = encode_sqrt_ratio_x96(U256::from(4), U256::one()).unwrap();
        let (lo, hi) = full_range_ticks(3000).unwrap();
        let (a, b) = (get_sqrt_ratio_at_tick(lo).unwrap(), get_sqrt_ratio_at_tick(hi).unwrap());
        let amount0 = U256::exp10(18);
        let amount1 = U256::exp10(18) * 10;

        let liquidity = max_liquidity_for_amounts(price, a, b, amount0, amount1).unwrap();
        let (used0, used1) = amounts_for_liquidity(price, a, b, liquidity).unwrap();
        assert!(used0 <= amount0 && used1 <= amount1);
        // amount0 is the binding side at price 4: ~all of it is used
        assert!(used0 > amount0 * 999 / 1000);
        assert!(used1 > U256::exp10(18) * 39 / 10 && used1 < U256::exp10(18) * 41 / 10);
    }

    #[test]
    fn out_of_range_positions_are_single_sided() {
        let a = get_sqrt_ratio_at_tick(-600).unwrap();
        let b = get_sqrt_ratio_at_tick(600).unwrap();
        let below = get_sqrt_ratio_at_tick(-1200).unwrap();
        let above = get_sqrt_ratio_at_tick(1200).unwrap();

        let (x, y) = amounts_for_liquidity(below, a, b, 1_000_000_000).unwrap();
        assert!(!x.is_zero() && y.is_zero());
        let (x, y) = amounts_for_liquidity(above, a, b, 1_000_000_000).unwrap();
        assert!(x.is_zero() && !y.is_zero());
        assert!(max_liquidity_for_amounts(q96(), a, a, U256::one(), U256::one()).is_err());
    }

    #[test]
    fn slippage_and_price() {
        assert_eq!(apply_slippage(U256::from(10_000), 100).unwrap(), U256::from(9_900));
        assert_eq!(apply_slippage(U256::from(10_000), 20_000).unwrap(), U256::zero());
        // no intermediate overflow on huge amounts
        assert_eq!(apply_slippage(U256::MAX, 0).unwrap(), U256::MAX);
        assert!(apply_slippage(U256::MAX, 100).unwrap() < U256::MAX);
        assert!((price_from_sqrt(q96(), 18, 18) - 1.0).abs() < 1e-12);
        assert!((price_from_sqrt(q96() * 10, 18, 6) - 1e14).abs() / 1e14 < 1e-9);
    }

    #[test]
    fn mul_div_widens() {
        let big = U256::MAX / 2;
        assert_eq!(mul_div(big, U256::from(4), U256::from(8)).unwrap(), big / 2);
        assert!(mul_div(U256::MAX, U256::from(2), U256::one()).is_err());
        assert_eq!(mul_div_rounding_up(U256::from(7), U256::one(), U256::from(2)).unwrap(), U256::from(4));
    }
}
