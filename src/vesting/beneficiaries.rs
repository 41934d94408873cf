//! Beneficiary list editing and validation for one allocation.

use std::collections::HashSet;

use ethers::types::{Address, U256};
use serde::Serialize;

use crate::{
    error::ValidationError,
    model::{Allocation, BeneficiaryEntry, MAX_VESTING_MONTHS},
    units::{parse_units, Percent},
};

/// One editable row. Text fields hold whatever was typed or pasted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeneficiaryRow {
    /// Backend id for rows that already exist.
    pub id: Option<String>,
    pub address: String,
    /// Percent of the allocation.
    pub amount: String,
    pub is_checked: bool,
}

impl BeneficiaryRow {
    pub fn new(address: impl Into<String>, amount: impl Into<String>) -> Self {
        Self { address: address.into(), amount: amount.into(), ..Default::default() }
    }

    fn is_blank(&self) -> bool {
        self.id.is_none() && self.address.trim().is_empty() && self.amount.trim().is_empty()
    }

    fn parsed_address(&self) -> Result<Address, ValidationError> {
        let raw = self.address.trim();
        raw.parse().map_err(|_| ValidationError::InvalidAddress(raw.to_string()))
    }

    fn parsed_amount(&self) -> Result<Percent, ValidationError> {
        self.amount.parse()
    }
}

impl From<&BeneficiaryEntry> for BeneficiaryRow {
    fn from(e: &BeneficiaryEntry) -> Self {
        Self {
            id: e.id.clone(),
            address: format!("{:?}", e.address),
            amount: e.amount.to_string(),
            is_checked: e.is_checked,
        }
    }
}

/// A pasted line that could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadLine {
    /// 1-based.
    pub line: usize,
    pub content: String,
    pub reason: String,
}

/// Parse `address<TAB|,>percent` lines. Blank lines are ignored.
pub fn parse_bulk(text: &str) -> (Vec<BeneficiaryRow>, Vec<BadLine>) {
    let mut rows = Vec::new();
    let mut bad = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(['\t', ',']).map(str::trim).filter(|f| !f.is_empty()).collect();
        let reject = |reason: String| BadLine { line: i + 1, content: line.to_string(), reason };
        let [address, amount] = fields[..] else {
            bad.push(reject(format!("expected 2 fields, found {}", fields.len())));
            continue;
        };
        let row = BeneficiaryRow::new(address, amount);
        if let Err(e) = row.parsed_address().and_then(|_| row.parsed_amount()) {
            bad.push(reject(e.to_string()));
            continue;
        }
        rows.push(row);
    }
    (rows, bad)
}

/// The add/remove beneficiary form. Starts with one blank row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeneficiaryForm {
    pub rows: Vec<BeneficiaryRow>,
}

impl Default for BeneficiaryForm {
    fn default() -> Self {
        Self { rows: vec![BeneficiaryRow::default()] }
    }
}

impl BeneficiaryForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing beneficiaries of `allocation`, for the remove flow.
    pub fn from_allocation(allocation: &Allocation) -> Self {
        Self { rows: allocation.addresses.iter().map(BeneficiaryRow::from).collect() }
    }

    pub fn push(&mut self, row: BeneficiaryRow) {
        self.rows.push(row);
    }

    /// Merge pasted rows. Blank rows are dropped first; rows whose address is
    /// already in the form (or earlier in the paste) are skipped silently.
    /// Returns how many rows were added.
    pub fn merge_pasted(&mut self, pasted: Vec<BeneficiaryRow>) -> usize {
        self.rows.retain(|r| !r.is_blank());
        let mut seen: HashSet<Address> = self.rows.iter().filter_map(|r| r.parsed_address().ok()).collect();
        let before = self.rows.len();
        for row in pasted {
            match row.parsed_address() {
                Ok(address) if seen.insert(address) => self.rows.push(row),
                _ => {}
            }
        }
        self.rows.len() - before
    }

    pub fn total_percent(&self) -> Result<Percent, ValidationError> {
        self.rows.iter().filter(|r| !r.is_blank()).map(BeneficiaryRow::parsed_amount).sum()
    }

    /// Every address valid and unique, percentages adding up to exactly 100.
    pub fn validate(&self) -> Result<Vec<BeneficiaryEntry>, ValidationError> {
        entries(self.rows.iter().filter(|r| !r.is_blank()))
    }

    pub fn toggle(&mut self, index: usize) {
        if let Some(row) = self.rows.get_mut(index) {
            row.is_checked = !row.is_checked;
        }
    }

    /// Split into the rows that stay (validated) and the ids being removed.
    pub fn split_checked(&self) -> Result<(Vec<BeneficiaryEntry>, Vec<String>), ValidationError> {
        let removed: Vec<String> = self.rows.iter().filter(|r| r.is_checked).filter_map(|r| r.id.clone()).collect();
        if removed.is_empty() {
            return Err(ValidationError::Empty("selection"));
        }
        let remaining = entries(self.rows.iter().filter(|r| !r.is_checked && !r.is_blank()))?;
        Ok((remaining, removed))
    }
}

fn entries<'a>(rows: impl Iterator<Item = &'a BeneficiaryRow>) -> Result<Vec<BeneficiaryEntry>, ValidationError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let address = row.parsed_address()?;
        if !seen.insert(address) {
            return Err(ValidationError::DuplicateAddress(address));
        }
        out.push(BeneficiaryEntry { id: row.id.clone(), address, amount: row.parsed_amount()?, is_checked: false });
    }
    if out.is_empty() {
        return Err(ValidationError::Empty("beneficiaries"));
    }
    let total: Percent = out.iter().map(|e| e.amount).sum();
    if total != Percent::HUNDRED {
        return Err(ValidationError::PercentTotal { total: total.to_string() });
    }
    Ok(out)
}

/// Token amounts in base units: `total_supply × allocation% × row%`.
pub fn to_absolute(
    entries: &[BeneficiaryEntry],
    total_supply: &str,
    allocation_percent: Percent,
    decimals: u8,
) -> Result<Vec<(Address, U256)>, ValidationError> {
    let total = parse_units(total_supply, decimals)?;
    entries
        .iter()
        .map(|e| Ok((e.address, Percent::of_share(total, allocation_percent, e.amount)?)))
        .collect()
}

/// Allocation shares must cover the whole supply, each with a sane vesting period.
pub fn validate_allocation_supply(allocations: &[Allocation]) -> Result<(), ValidationError> {
    if allocations.is_empty() {
        return Err(ValidationError::Empty("allocations"));
    }
    if let Some(a) = allocations.iter().find(|a| a.vesting > MAX_VESTING_MONTHS) {
        return Err(ValidationError::OutOfRange(format!(
            "allocation {} vests over {} months, limit is {MAX_VESTING_MONTHS}",
            a.id, a.vesting
        )));
    }
    let total: Percent = allocations.iter().map(|a| a.supply).sum();
    if total != Percent::HUNDRED {
        return Err(ValidationError::SupplyTotal { total: total.to_string() });
    }
    Ok(())
}
