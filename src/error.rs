//! Error taxonomy.
//!
//! - [`TxFailure`]: normalized provider/wallet/contract failure. Every raw
//!   `ethers` error and every JSON-shaped error coming from a node or a relay
//!   is folded into one of four variants before it leaves this crate.
//! - [`ValidationError`]: client-side invariant violations, raised before any
//!   network or chain call is attempted.
//! - [`LaunchpadError`]: what orchestrator operations return.

use ethers::{
    abi::{self, ParamType, Token},
    contract::ContractError,
    providers::{JsonRpcError, Middleware, MiddlewareError, ProviderError, RpcError},
    types::Address,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{backend::BackendError, config::ConfigError, outbox::StoreError};

/// `Error(string)` selector.
const REVERT_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)` selector.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

const REJECTION_MARKERS: [&str; 3] = ["rejected", "denied", "cancelled"];
const NETWORK_MARKERS: [&str; 7] = [
    "error sending request",
    "connection refused",
    "connection reset",
    "timed out",
    "dns error",
    "network is unreachable",
    "failed to connect",
];

/// Normalized failure of a chain interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxFailure {
    /// Contract reverted; `reason` is shown verbatim.
    #[error("transaction reverted: {reason}")]
    Revert { reason: String },
    /// The wallet owner declined to sign.
    #[error("request rejected in wallet")]
    UserRejected,
    /// The RPC endpoint could not be reached.
    #[error("network error: {cause}")]
    Network { cause: String },
    /// Anything that did not match a known shape.
    #[error("unexpected provider error: {raw}")]
    Unknown { raw: String },
}

impl TxFailure {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TxFailure::Revert { .. } => "revert",
            TxFailure::UserRejected => "user_rejected",
            TxFailure::Network { .. } => "network",
            TxFailure::Unknown { .. } => "unknown",
        }
    }

    /// Extract a reason from a heterogeneous JSON error object.
    ///
    /// Lookup order: `error.data.message`, `info.error.data.message`,
    /// `shortMessage`, `message`. The first string found wins.
    pub fn from_json(raw: &Value) -> TxFailure {
        if is_rejection_code(raw) {
            return TxFailure::UserRejected;
        }

        const PATHS: [&[&str]; 4] = [
            &["error", "data", "message"],
            &["info", "error", "data", "message"],
            &["shortMessage"],
            &["message"],
        ];

        PATHS
            .iter()
            .find_map(|path| lookup_str(raw, path))
            .map(|msg| match TxFailure::from_message(msg) {
                // A message found at a known location is a revert reason unless
                // it reads like a rejection or a transport failure.
                TxFailure::Unknown { raw } => TxFailure::Revert { reason: raw },
                other => other,
            })
            .unwrap_or_else(|| TxFailure::Unknown { raw: raw.to_string() })
    }

    /// Classify a bare error message.
    pub fn from_message(msg: &str) -> TxFailure {
        let lower = msg.to_ascii_lowercase();
        if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            return TxFailure::UserRejected;
        }
        if let Some(idx) = lower.find("execution reverted") {
            let tail = msg[idx + "execution reverted".len()..].trim_start_matches(':').trim();
            let reason = tail
                .split(", data")
                .next()
                .unwrap_or_default()
                .trim_end_matches(')')
                .trim();
            let reason = if reason.is_empty() { "execution reverted" } else { reason };
            return TxFailure::Revert { reason: reason.to_string() };
        }
        if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
            return TxFailure::Network { cause: msg.to_string() };
        }
        TxFailure::Unknown { raw: msg.to_string() }
    }

    /// Fold an `ethers` contract error.
    pub fn from_contract_error<M: Middleware>(err: &ContractError<M>) -> TxFailure {
        match err {
            ContractError::Revert(data) => TxFailure::Revert {
                reason: decode_revert_data(data).unwrap_or_else(|| "execution reverted".into()),
            },
            ContractError::MiddlewareError { e } => match MiddlewareError::as_error_response(e) {
                Some(resp) => from_rpc_response(resp),
                None => TxFailure::from_message(&e.to_string()),
            },
            ContractError::ProviderError { e } => TxFailure::from_provider_error(e),
            other => TxFailure::Unknown { raw: other.to_string() },
        }
    }

    /// Fold a provider/transport error.
    pub fn from_provider_error(err: &ProviderError) -> TxFailure {
        match RpcError::as_error_response(err) {
            Some(resp) => from_rpc_response(resp),
            None => match TxFailure::from_message(&err.to_string()) {
                TxFailure::Unknown { raw } if matches!(err, ProviderError::HTTPError(_)) => {
                    TxFailure::Network { cause: raw }
                }
                other => other,
            },
        }
    }
}

fn from_rpc_response(resp: &JsonRpcError) -> TxFailure {
    if resp.code == USER_REJECTED_CODE {
        return TxFailure::UserRejected;
    }
    if let Some(reason) = resp
        .as_revert_data()
        .as_ref()
        .and_then(|data| decode_revert_data(data))
    {
        return TxFailure::Revert { reason };
    }
    let shaped = serde_json::json!({
        "code": resp.code,
        "error": { "data": resp.data.clone().unwrap_or(Value::Null) },
        "message": resp.message,
    });
    TxFailure::from_json(&shaped)
}

fn is_rejection_code(raw: &Value) -> bool {
    let code = raw.get("code");
    code.and_then(Value::as_i64) == Some(USER_REJECTED_CODE)
        || code.and_then(Value::as_str) == Some("ACTION_REJECTED")
}

fn lookup_str<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(raw, |node, key| node.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Decode a revert payload into a readable reason.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, body) = data.split_at(4);
    if selector == REVERT_SELECTOR {
        return match abi::decode(&[ParamType::String], body).ok()?.pop()? {
            Token::String(s) => Some(s),
            _ => None,
        };
    }
    if selector == PANIC_SELECTOR {
        return match abi::decode(&[ParamType::Uint(256)], body).ok()?.pop()? {
            Token::Uint(code) => Some(format!("panic code {code:#x}")),
            _ => None,
        };
    }
    Some(format!("custom error 0x{}", hex_prefix(selector)))
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Client-side invariant violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("beneficiary percentages must add up to 100%, got {total}%")]
    PercentTotal { total: String },
    #[error("allocation supply must add up to 100%, got {total}%")]
    SupplyTotal { total: String },
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("duplicate address {0:?}")]
    DuplicateAddress(Address),
    #[error("invalid amount `{0}`")]
    InvalidAmount(String),
    #[error("amount {amount} exceeds maximum contribution {max}")]
    ExceedsMax { amount: String, max: String },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// How loudly a failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Orchestrator error.
#[derive(Debug, Error)]
pub enum LaunchpadError {
    #[error("wallet not connected")]
    WalletNotConnected,
    #[error("invalid wallet key: {0}")]
    InvalidWalletKey(String),
    #[error("chain {0} is not configured")]
    UnknownChain(u64),
    #[error("contract `{name}` is not configured for chain {chain_id}")]
    MissingContract { name: &'static str, chain_id: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("allocation `{0}` is finalized")]
    AllocationFinalized(String),
    #[error("allocation `{0}` has no locker contract")]
    NoLocker(String),
    #[error("project `{0}` has no deployed token")]
    NoToken(String),
    #[error("claim is not available: hardcap not reached")]
    ClaimUnavailable,
    #[error("refund is not available")]
    RefundUnavailable,
    #[error("presale already withdrawn")]
    AlreadyWithdrawn,
    #[error("presale is not activated on-chain")]
    NotActivated,
    #[error("pool does not exist")]
    PoolMissing,
    #[error("operation not allowed while {0}")]
    InvalidState(String),
    #[error(transparent)]
    Chain(#[from] TxFailure),
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("price feed: {0}")]
    PriceFeed(String),
    #[error("math: {0}")]
    Math(&'static str),
    #[error("artifact: {0}")]
    Artifact(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Outbox(#[from] StoreError),
}

impl LaunchpadError {
    /// One-line message for a notification toast.
    pub fn user_message(&self) -> String {
        match self {
            LaunchpadError::Chain(TxFailure::Revert { reason }) => reason.clone(),
            LaunchpadError::Chain(TxFailure::UserRejected) => {
                "Transaction was rejected in the wallet".into()
            }
            LaunchpadError::Chain(TxFailure::Network { .. }) => {
                "Network error, please check your connection and try again".into()
            }
            LaunchpadError::Chain(TxFailure::Unknown { raw }) => raw.clone(),
            LaunchpadError::WalletNotConnected => "Please connect your wallet".into(),
            other => other.to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LaunchpadError::Chain(TxFailure::UserRejected) => Severity::Info,
            LaunchpadError::Validation(_)
            | LaunchpadError::WalletNotConnected
            | LaunchpadError::ClaimUnavailable
            | LaunchpadError::RefundUnavailable => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchpadError::Chain(f) => f.kind(),
            LaunchpadError::Validation(_) => "validation",
            LaunchpadError::Backend(_) => "backend",
            _ => "other",
        }
    }
}
