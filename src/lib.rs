//! Launchpad orchestrator: client-side presale, vesting, airdrop and
//! Uniswap V3 liquidity flows against EVM contracts.
//!
//! Layout:
//! - `provider` resolves a read provider per chain (RPC fallback list) and
//!   builds fresh signer sessions from the connected wallet.
//! - `contracts` holds the ABI bindings and the transaction submit helper.
//! - `presale`, `vesting`, `airdrop`, `liquidity` are the orchestrators. Each
//!   talks to the chain through a gateway trait so it can be driven by mocks.
//! - `outbox` keeps backend mutations that follow a confirmed transaction
//!   until the backend acknowledges them.
//! - `market` caches prices and balances with per-kind TTLs.
//!
//! All shared state lives in [`LaunchpadContext`], constructed once by the
//! embedding application and torn down with [`LaunchpadContext::disconnect`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod airdrop;
pub mod backend;
pub mod batch;
pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod liquidity;
pub mod market;
pub mod metrics;
pub mod model;
pub mod outbox;
pub mod presale;
pub mod provider;
pub mod telemetry;
pub mod units;
pub mod vesting;

#[cfg(test)]
mod testing;

pub use context::LaunchpadContext;
pub use error::{LaunchpadError, Severity, TxFailure, ValidationError};

/// Re-exports for embedding applications.
pub mod prelude {
    pub use super::{
        airdrop::{AirdropEntry, AirdropOrchestrator},
        backend::{BackendApi, HttpBackend, SyncJob},
        batch::BatchResult,
        config::Config,
        context::LaunchpadContext,
        contracts::ContractRef,
        error::{LaunchpadError, Severity, TxFailure, ValidationError},
        liquidity::{
            math::{convert_fee_tier, FeeTier},
            AddLiquidityRequest, LiquidityOrchestrator, LiquidityPhase, RemoveLiquidityRequest,
            SwapAndAddRequest,
        },
        market::MarketData,
        metrics::{Metrics, NoopMetrics, PrometheusMetrics},
        model::{Allocation, BeneficiaryEntry, Presale, PresaleUnit, Project},
        outbox::{SyncOutbox, SyncStatus},
        presale::{is_claim_available, is_refund_available, PresaleOrchestrator, PresaleSnapshot},
        provider::{RpcSelector, WalletAdapter},
        units::{compute_progress, format_units, parse_units, safe_divide},
        vesting::{BeneficiaryForm, LockerOrchestrator},
    };
}
