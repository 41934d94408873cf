//! Unlock schedule math. Pure; no chain calls.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Utc};
use ethers::types::U256;
use serde::{Serialize, Serializer};

use crate::{
    error::ValidationError,
    model::{Allocation, Project},
    units::Percent,
};

/// A calendar month, used as the shared x-axis of the unlock chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthIndex {
    year: i32,
    /// 1..=12
    month: u32,
}

impl MonthIndex {
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) {
            return Err(ValidationError::OutOfRange(format!("month {month}")));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: DateTime<Utc>) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    fn ordinal(self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self { year: ordinal.div_euclid(12) as i32, month: ordinal.rem_euclid(12) as u32 + 1 }
    }

    /// Months from `self` to `other`; negative when `other` is earlier.
    pub fn months_until(self, other: MonthIndex) -> i64 {
        other.ordinal() - self.ordinal()
    }

    pub fn plus(self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }
}

impl fmt::Display for MonthIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthIndex {
    type Err = ValidationError;

    /// `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::OutOfRange(format!("month `{s}`, expected YYYY-MM"));
        let (y, m) = s.trim().split_once('-').ok_or_else(bad)?;
        let year = y.parse().map_err(|_| bad())?;
        let month = m.parse().map_err(|_| bad())?;
        Self::new(year, month)
    }
}

impl Serialize for MonthIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Token amount (base units) carved out of `total_supply` by `supply`.
pub fn allocation_tokens(total_supply: U256, supply: Percent) -> Result<U256, ValidationError> {
    supply.of(total_supply)
}

/// Amount unlocked once `step + 1` vesting months have elapsed. Integer
/// division leaves a remainder, which is credited in the final month so the
/// total is reached exactly. `vesting == 0` unlocks everything at step 0.
fn unlocked_after(tokens: U256, vesting_months: u32, step: i64) -> U256 {
    if step < 0 {
        return U256::zero();
    }
    let vesting = u64::from(vesting_months);
    let elapsed = (step as u64).saturating_add(1);
    if elapsed >= vesting {
        tokens
    } else {
        tokens / U256::from(vesting) * U256::from(elapsed)
    }
}

/// Amount unlocked in each vesting month, computed lazily.
pub fn unlock_increments(tokens: U256, vesting_months: u32) -> impl Iterator<Item = U256> {
    (0..i64::from(vesting_months.max(1)))
        .map(move |step| unlocked_after(tokens, vesting_months, step) - unlocked_after(tokens, vesting_months, step - 1))
}

/// Running total of `allocation` unlocks over `months` months from `anchor`.
/// Zero before the allocation starts, flat at the full amount after it ends.
pub fn cumulative_series(
    allocation: &Allocation,
    total_supply: U256,
    anchor: MonthIndex,
    months: usize,
) -> Result<Vec<U256>, ValidationError> {
    let tokens = allocation_tokens(total_supply, allocation.supply)?;
    let start = anchor.months_until(MonthIndex::of(allocation.start_date));
    Ok((0..months as i64).map(|i| unlocked_after(tokens, allocation.vesting, i - start)).collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSeries {
    pub allocation_id: String,
    pub name: String,
    /// Full allocation, base units.
    pub total: U256,
    /// Cumulative unlocked amount per month, base units.
    pub cumulative: Vec<U256>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub months: Vec<MonthIndex>,
    pub series: Vec<AllocationSeries>,
}

impl Timeline {
    /// First month at which every allocation has fully unlocked, or `None`
    /// when that happens after the window or there are no allocations.
    pub fn fully_unlocked_at(&self) -> Option<MonthIndex> {
        if self.series.is_empty() {
            return None;
        }
        (0..self.months.len())
            .find(|&i| self.series.iter().all(|s| s.cumulative.get(i) == Some(&s.total)))
            .map(|i| self.months[i])
    }
}

/// Earliest allocation start, the default chart anchor.
pub fn default_anchor(project: &Project) -> Option<MonthIndex> {
    project.allocations.iter().map(|a| MonthIndex::of(a.start_date)).min()
}

pub fn timeline(project: &Project, anchor: MonthIndex, months: usize) -> Result<Timeline, ValidationError> {
    let total_supply = project.total_supply_units()?;
    Ok(Timeline {
        months: (0..months as i64).map(|i| anchor.plus(i)).collect(),
        series: project
            .allocations
            .iter()
            .map(|a| {
                Ok(AllocationSeries {
                    allocation_id: a.id.clone(),
                    name: a.name.clone(),
                    total: allocation_tokens(total_supply, a.supply)?,
                    cumulative: cumulative_series(a, total_supply, anchor, months)?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn units(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn month_index_parsing_and_arithmetic() {
        let m: MonthIndex = "2025-11".parse().unwrap();
        assert_eq!(m.plus(3).to_string(), "2026-02");
        assert_eq!(m.plus(-11).to_string(), "2024-12");
        assert_eq!(m.months_until("2026-01".parse().unwrap()), 2);
        assert!("2025-13".parse::<MonthIndex>().is_err());
        assert!("2025".parse::<MonthIndex>().is_err());
    }

    #[test]
    fn increments_sum_to_total() {
        let inc: Vec<U256> = unlock_increments(U256::from(100), 3).collect();
        assert_eq!(inc, vec![U256::from(33), U256::from(33), U256::from(34)]);
        let once: Vec<U256> = unlock_increments(U256::from(100), 0).collect();
        assert_eq!(once, vec![U256::from(100)]);
    }

    #[test]
    fn huge_vesting_period_stays_lazy() {
        let alloc = testing::allocation("team", "20", u32::MAX, None);
        let anchor = MonthIndex::new(2025, 1).unwrap();
        let series = cumulative_series(&alloc, units(1_000_000), anchor, 1).unwrap();
        assert_eq!(series.len(), 1);
        assert!(series[0] > U256::zero() && series[0] < units(200_000));
        let first: Vec<U256> = unlock_increments(U256::from(100), u32::MAX).take(2).collect();
        assert_eq!(first, vec![U256::zero(), U256::zero()]);
    }

    #[test]
    fn linear_vesting_is_padded_on_both_sides() {
        // 20% of 1,000,000 over 4 months starting 2025-01, anchored two months earlier
        let alloc = testing::allocation("team", "20", 4, None);
        let anchor = MonthIndex::new(2024, 11).unwrap();
        let series = cumulative_series(&alloc, units(1_000_000), anchor, 8).unwrap();
        let expected: Vec<U256> = [0, 0, 50_000, 100_000, 150_000, 200_000, 200_000, 200_000]
            .into_iter()
            .map(units)
            .collect();
        assert_eq!(series, expected);
    }

    #[test]
    fn zero_vesting_unlocks_at_start() {
        let alloc = testing::allocation("presale", "50", 0, None);
        let anchor = MonthIndex::new(2024, 12).unwrap();
        let series = cumulative_series(&alloc, units(1_000_000), anchor, 3).unwrap();
        assert_eq!(series, vec![U256::zero(), units(500_000), units(500_000)]);
    }

    #[test]
    fn allocation_starting_before_anchor_is_partially_unlocked() {
        let alloc = testing::allocation("team", "20", 4, None);
        let anchor = MonthIndex::new(2025, 3).unwrap();
        let series = cumulative_series(&alloc, units(1_000_000), anchor, 3).unwrap();
        assert_eq!(series, vec![units(150_000), units(200_000), units(200_000)]);
    }

    #[test]
    fn project_timeline() {
        let project = testing::project();
        let anchor = default_anchor(&project).unwrap();
        assert_eq!(anchor.to_string(), "2025-01");
        let t = timeline(&project, anchor, 14).unwrap();
        assert_eq!(t.months.len(), 14);
        assert_eq!(t.series.len(), 3);
        assert_eq!(t.series[0].cumulative[11], units(200_000));
        assert_eq!(t.series[1].cumulative[0], units(500_000));
        assert_eq!(t.fully_unlocked_at().unwrap().to_string(), "2025-12");
    }

    #[test]
    fn window_ending_before_vesting_is_not_fully_unlocked() {
        let mut project = testing::project();
        project.allocations = vec![testing::allocation("team", "100", 12, None)];
        let anchor = MonthIndex::new(2025, 1).unwrap();

        let short = timeline(&project, anchor, 6).unwrap();
        assert_eq!(short.series[0].cumulative[5], units(1_000_000) / 12 * 6);
        assert_eq!(short.fully_unlocked_at(), None);

        let full = timeline(&project, anchor, 12).unwrap();
        assert_eq!(full.fully_unlocked_at().unwrap().to_string(), "2025-12");

        project.allocations.clear();
        assert_eq!(timeline(&project, anchor, 6).unwrap().fully_unlocked_at(), None);
    }
}
