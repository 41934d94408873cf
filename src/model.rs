//! Backend-owned records as the orchestrators consume them.
//!
//! These are projections: the backend is authoritative for everything here
//! except the fields the orchestrators write back through the outbox.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    units::{parse_units, Percent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Submitted,
    Deployed,
    Live,
    Closed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub decimals: u8,
    /// Human units.
    pub total_supply: String,
    #[serde(default)]
    pub contract_address: Option<Address>,
    pub chain_id: u64,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    #[serde(default)]
    pub presales: Vec<Presale>,
    #[serde(default)]
    pub socials: BTreeMap<String, String>,
    #[serde(default)]
    pub status: ProjectStatus,
}

impl Project {
    pub fn total_supply_units(&self) -> Result<U256, ValidationError> {
        parse_units(&self.total_supply, self.decimals)
    }

    pub fn token(&self) -> Option<Address> {
        self.contract_address
    }

    pub fn allocation(&self, id: &str) -> Option<&Allocation> {
        self.allocations.iter().find(|a| a.id == id)
    }
}

/// Longest vesting period accepted from the backend: 100 years.
pub const MAX_VESTING_MONTHS: u32 = 1200;

/// A named slice of total supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: String,
    pub name: String,
    /// Share of total supply.
    pub supply: Percent,
    /// Months; 0 unlocks everything at `start_date`.
    pub vesting: u32,
    pub start_date: DateTime<Utc>,
    /// Locker contract.
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub is_finalized: bool,
    #[serde(default)]
    pub addresses: Vec<BeneficiaryEntry>,
}

impl Allocation {
    pub fn locker(&self) -> Option<Address> {
        self.contract_address
    }

    /// Has a deployed locker and a non-zero vesting period.
    pub fn is_vested_locker(&self) -> bool {
        self.contract_address.is_some() && self.vesting > 0
    }

    pub fn tokens(&self, total_supply: U256) -> Result<U256, ValidationError> {
        self.supply.of(total_supply)
    }
}

/// One beneficiary of an allocation. `amount` is a share of the allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub address: Address,
    pub amount: Percent,
    /// Row selection state; never sent anywhere.
    #[serde(default, skip_serializing)]
    pub is_checked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresaleUnit {
    #[default]
    Native,
    Stablecoin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presale {
    pub id: String,
    pub project_id: String,
    /// Human units of the payment asset.
    pub hardcap: String,
    pub price: String,
    #[serde(default)]
    pub unit: PresaleUnit,
    pub max_contribution: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub duration_days: u32,
    #[serde(default)]
    pub whitelist_contract: Option<Address>,
    /// Whitelist-only phase length in days; falls back to the configured default.
    #[serde(default)]
    pub whitelist_duration_days: Option<u32>,
    /// On-chain id, present once activated.
    #[serde(default, rename = "presaleSCID")]
    pub presale_scid: Option<u64>,
    #[serde(default)]
    pub is_withdrawn: bool,
}

impl Presale {
    /// Decimals used to format contributions.
    pub fn contribution_decimals(&self, project_decimals: u8, stablecoin_decimals: u8) -> u8 {
        match self.unit {
            PresaleUnit::Stablecoin => stablecoin_decimals,
            PresaleUnit::Native => project_decimals,
        }
    }
}
