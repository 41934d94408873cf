//! Configuration loader.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults (Ethereum mainnet and BNB Chain are preconfigured)
//!   2) Config file (explicit path or auto-discovered)
//!   3) Environment variables, `LAUNCHPAD__SECTION__KEY`, after `.env` is loaded
//!
//! A few plain variables are honoured on top of that: `NEXT_PUBLIC_BSC_RPC`
//! puts an RPC endpoint in front of chain 56's list and `ZKME_*` fill the KYC
//! section verbatim.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config as cfg;
use directories::ProjectDirs;
use dotenvy::dotenv;
use ethers::types::Address;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const ENV_PREFIX: &str = "LAUNCHPAD";
pub const BSC_CHAIN_ID: u64 = 56;
pub const MAINNET_CHAIN_ID: u64 = 1;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub wallet: Wallet,
    pub rpc: Rpc,
    pub chains: Vec<ChainConfig>,
    pub backend: Backend,
    pub market: Market,
    pub outbox: Outbox,
    pub presale: PresaleDefaults,
    pub liquidity: Liquidity,
    pub airdrop: Airdrop,
    pub kyc: Kyc,
    pub telemetry: Telemetry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub name: String,
    /// "prod" | "staging" | "dev".
    pub environment: String,
}

/// Signer for write operations. Absent key means read-only.
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct Wallet {
    /// Hex secp256k1 key, with or without `0x`.
    pub private_key: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rpc {
    /// Per-endpoint budget for `eth_chainId` + `eth_blockNumber`.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    /// Public endpoints in probe order.
    pub rpc_urls: Vec<String>,
    /// Endpoint of the wallet's own provider; last resort for reads.
    pub wallet_rpc: String,
    pub uniswap: UniswapAddresses,
    pub stablecoin: Stablecoin,
    #[serde(default)]
    pub presale_contract: Option<Address>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UniswapAddresses {
    pub factory: Address,
    pub position_manager: Address,
    pub swap_router: Address,
    pub quoter: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stablecoin {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Backend {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub api_token: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Market {
    pub coingecko_url: String,
    #[serde(with = "humantime_serde")]
    pub price_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub balance_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_debounce: Duration,
    /// Ticker symbol to CoinGecko coin id.
    pub coingecko_ids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Outbox {
    /// JSON file for pending backend syncs; in-memory when unset.
    pub path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub max_elapsed: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresaleDefaults {
    #[serde(with = "humantime_serde")]
    pub whitelist_duration: Duration,
    /// Delay between presale end and claim opening.
    #[serde(with = "humantime_serde")]
    pub claim_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    #[default]
    Infinite,
    Exact,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Liquidity {
    pub slippage_bps: u32,
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    pub approval: ApprovalPolicy,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Airdrop {
    /// Compiled contract JSON with `abi` and `bytecode`.
    pub artifact_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Kyc {
    pub app_id: Option<String>,
    pub dapp_name: Option<String>,
    pub program_no: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// RUST_LOG-like directive.
    pub log_filter: String,
    pub json: bool,
}

fn default_native_symbol() -> String {
    "ETH".into()
}

fn addr(s: &str) -> Address {
    s.parse().unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: App::default(),
            wallet: Wallet::default(),
            rpc: Rpc::default(),
            chains: default_chains(),
            backend: Backend::default(),
            market: Market::default(),
            outbox: Outbox::default(),
            presale: PresaleDefaults::default(),
            liquidity: Liquidity::default(),
            airdrop: Airdrop::default(),
            kyc: Kyc::default(),
            telemetry: Telemetry::default(),
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self { name: "launchpad-orchestrator".into(), environment: "dev".into() }
    }
}

impl Default for Rpc {
    fn default() -> Self {
        Self { probe_timeout: Duration::from_secs(5) }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".into(),
            timeout: Duration::from_secs(15),
            api_token: None,
        }
    }
}

impl Default for Market {
    fn default() -> Self {
        let coingecko_ids = [("ETH", "ethereum"), ("BNB", "binancecoin"), ("USDT", "tether")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            coingecko_url: "https://api.coingecko.com/api/v3/".into(),
            price_ttl: Duration::from_secs(5 * 60),
            balance_ttl: Duration::from_secs(30),
            refresh_debounce: Duration::from_millis(500),
            coingecko_ids,
        }
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self {
            path: None,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl Default for PresaleDefaults {
    fn default() -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            whitelist_duration: Duration::from_secs(DAY),
            claim_delay: Duration::from_secs(DAY),
            sweep_duration: Duration::from_secs(30 * DAY),
        }
    }
}

impl Default for Liquidity {
    fn default() -> Self {
        Self {
            slippage_bps: 100,
            deadline: Duration::from_secs(20 * 60),
            approval: ApprovalPolicy::Infinite,
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self { log_filter: "info,launchpad_orchestrator=info".into(), json: false }
    }
}

fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            chain_id: MAINNET_CHAIN_ID,
            name: "Ethereum".into(),
            native_symbol: "ETH".into(),
            rpc_urls: vec![
                "https://eth.llamarpc.com".into(),
                "https://rpc.ankr.com/eth".into(),
                "https://ethereum.publicnode.com".into(),
                "https://cloudflare-eth.com".into(),
            ],
            wallet_rpc: "https://cloudflare-eth.com".into(),
            uniswap: UniswapAddresses {
                factory: addr("0x1F98431c8aD98523631AE4a59f267346ea31F984"),
                position_manager: addr("0xC36442b4a4522E871399CD717aBDD847Ab11FE88"),
                swap_router: addr("0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45"),
                quoter: addr("0x61fFE014bA17989E743c5F6cB21bF9697530B21e"),
            },
            stablecoin: Stablecoin {
                address: addr("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
                symbol: "USDT".into(),
                decimals: 6,
            },
            presale_contract: None,
        },
        ChainConfig {
            chain_id: BSC_CHAIN_ID,
            name: "BNB Chain".into(),
            native_symbol: "BNB".into(),
            rpc_urls: vec![
                "https://bsc-dataseed.binance.org".into(),
                "https://bsc-dataseed1.defibit.io".into(),
                "https://bsc.publicnode.com".into(),
                "https://rpc.ankr.com/bsc".into(),
            ],
            wallet_rpc: "https://bsc-dataseed.binance.org".into(),
            uniswap: UniswapAddresses {
                factory: addr("0xdB1d10011AD0Ff90774D0C6Bb92e5C5c8b4461F7"),
                position_manager: addr("0x7b8A01B39D58278b5DE7e48c8449c9f4F5170613"),
                swap_router: addr("0xB971eF87ede563556b2ED4b1C0b0019111Dd85d2"),
                quoter: addr("0x78D78E420Da98ad378D7799bE8f4AF69033EB077"),
            },
            stablecoin: Stablecoin {
                address: addr("0x55d398326f99059fF775485246999027B3197955"),
                symbol: "USDT".into(),
                decimals: 18,
            },
            presale_contract: None,
        },
    ]
}

impl Config {
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn is_prod(&self) -> bool {
        self.app.environment == "prod"
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("invalid chain list: {0}")]
    InvalidChains(String),
    #[error("`{0}` is out of range")]
    OutOfRange(&'static str),
    #[error("`{0}` is required in prod")]
    RequiredInProd(&'static str),
}

/// Load configuration: defaults → file → environment.
///
///   LAUNCHPAD__APP__ENVIRONMENT=staging
///   LAUNCHPAD__WALLET__PRIVATE_KEY=0x... (redacted in logs)
///   LAUNCHPAD__LIQUIDITY__SLIPPAGE_BPS=50
pub fn load(explicit_file: Option<&Path>) -> Result<Config, ConfigError> {
    let _ = dotenv();

    let defaults = Config::default();
    let mut builder = cfg::Config::builder()
        .set_default("app.name", defaults.app.name.clone())?
        .set_default("app.environment", defaults.app.environment.clone())?
        .set_default("rpc.probe_timeout", "5s")?
        .set_default("backend.base_url", defaults.backend.base_url.clone())?
        .set_default("backend.timeout", "15s")?
        .set_default("market.coingecko_url", defaults.market.coingecko_url.clone())?
        .set_default("market.price_ttl", "5m")?
        .set_default("market.balance_ttl", "30s")?
        .set_default("market.refresh_debounce", "500ms")?
        .set_default("outbox.initial_interval", "500ms")?
        .set_default("outbox.max_interval", "30s")?
        .set_default("outbox.max_elapsed", "2m")?
        .set_default("liquidity.slippage_bps", i64::from(defaults.liquidity.slippage_bps))?
        .set_default("liquidity.deadline", "20m")?
        .set_default("liquidity.approval", "infinite")?
        .set_default("telemetry.log_filter", defaults.telemetry.log_filter.clone())?
        .set_default("telemetry.json", defaults.telemetry.json)?;

    for path in discover_config_files(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }

    builder = builder.add_source(
        cfg::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut config: Config = builder.build()?.try_deserialize()?;
    apply_plain_env(&mut config, |name| std::env::var(name).ok());
    validate_and_normalize(&mut config)?;
    Ok(config)
}

/// Explicit path if provided, else every existing
/// `<config dir>/launchpad-orchestrator/config.{toml,yaml,yml,json}` then `./config.*`.
fn discover_config_files(explicit: Option<&Path>) -> Result<Vec<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        return if p.exists() {
            Ok(vec![p.to_path_buf()])
        } else {
            Err(ConfigError::PathNotFound(p.display().to_string()))
        };
    }

    const NAMES: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(pd) = ProjectDirs::from("io", "Launchpad", "launchpad-orchestrator") {
        candidates.extend(NAMES.iter().map(|n| pd.config_dir().join(n)));
    }
    candidates.extend(NAMES.iter().map(PathBuf::from));

    Ok(candidates.into_iter().filter(|c| c.exists()).collect())
}

fn apply_plain_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let present = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = present("NEXT_PUBLIC_BSC_RPC") {
        if let Some(bsc) = config.chains.iter_mut().find(|c| c.chain_id == BSC_CHAIN_ID) {
            bsc.rpc_urls.retain(|u| u != &url);
            bsc.rpc_urls.insert(0, url);
        }
    }

    if let Some(v) = present("ZKME_APP_ID") {
        config.kyc.app_id = Some(v);
    }
    if let Some(v) = present("ZKME_DAPP_NAME") {
        config.kyc.dapp_name = Some(v);
    }
    if let Some(v) = present("ZKME_PROGRAM_NO") {
        config.kyc.program_no = Some(v);
    }
}

fn validate_and_normalize(config: &mut Config) -> Result<(), ConfigError> {
    config.app.environment = config.app.environment.trim().to_lowercase();

    if config.chains.is_empty() {
        return Err(ConfigError::InvalidChains("no chains configured".into()));
    }
    let mut seen = HashSet::new();
    for chain in &mut config.chains {
        if !seen.insert(chain.chain_id) {
            return Err(ConfigError::InvalidChains(format!("duplicate chain id {}", chain.chain_id)));
        }
        chain.rpc_urls.iter_mut().for_each(|u| *u = u.trim().to_string());
        chain.rpc_urls.retain(|u| !u.is_empty());
        if chain.rpc_urls.is_empty() {
            return Err(ConfigError::InvalidChains(format!("chain {} has no rpc urls", chain.chain_id)));
        }
        for url in chain.rpc_urls.iter().chain(std::iter::once(&chain.wallet_rpc)) {
            check_url(url)?;
        }
    }

    check_url(&config.backend.base_url)?;
    check_url(&config.market.coingecko_url)?;

    // File keys arrive lowercased.
    config.market.coingecko_ids = std::mem::take(&mut config.market.coingecko_ids)
        .into_iter()
        .map(|(symbol, id)| (symbol.to_uppercase(), id))
        .collect();

    if config.liquidity.slippage_bps > 10_000 {
        return Err(ConfigError::OutOfRange("liquidity.slippage_bps"));
    }

    if config.is_prod() && config.outbox.path.is_none() {
        return Err(ConfigError::RequiredInProd("outbox.path"));
    }

    if let Some(p) = &config.airdrop.artifact_path {
        if !p.exists() {
            return Err(ConfigError::PathNotFound(p.display().to_string()));
        }
    }

    Ok(())
}

fn check_url(url: &str) -> Result<(), ConfigError> {
    Url::parse(url).map(|_| ()).map_err(|_| ConfigError::InvalidUrl(url.to_string()))
}

/// Secrets are masked.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app", &self.app)
            .field("wallet", &Redacted(&self.wallet))
            .field("rpc", &self.rpc)
            .field("chains", &self.chains)
            .field("backend", &Redacted(&self.backend))
            .field("market", &self.market)
            .field("outbox", &self.outbox)
            .field("presale", &self.presale)
            .field("liquidity", &self.liquidity)
            .field("airdrop", &self.airdrop)
            .field("kyc", &self.kyc)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

struct Redacted<'a, T>(&'a T);

impl fmt::Debug for Redacted<'_, Wallet> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("private_key", &self.0.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for Redacted<'_, Backend> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("base_url", &self.0.base_url)
            .field("timeout", &self.0.timeout)
            .field("api_token", &self.0.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = Config::default();
        assert!(validate_and_normalize(&mut cfg).is_ok());
        for chain in &cfg.chains {
            assert_ne!(chain.uniswap.factory, Address::zero());
            assert_ne!(chain.uniswap.position_manager, Address::zero());
            assert_ne!(chain.uniswap.swap_router, Address::zero());
            assert_ne!(chain.uniswap.quoter, Address::zero());
            assert_ne!(chain.stablecoin.address, Address::zero());
        }
    }

    #[test]
    fn prod_requires_outbox_path() {
        let mut cfg = Config::default();
        cfg.app.environment = "PROD".into();
        assert!(matches!(
            validate_and_normalize(&mut cfg),
            Err(ConfigError::RequiredInProd("outbox.path"))
        ));
        cfg.outbox.path = Some(PathBuf::from("outbox.json"));
        assert!(validate_and_normalize(&mut cfg).is_ok());
    }

    #[test]
    fn rejects_bad_chains_and_urls() {
        let mut cfg = Config::default();
        cfg.chains.push(cfg.chains[0].clone());
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::InvalidChains(_))));

        let mut cfg = Config::default();
        cfg.chains[0].rpc_urls = vec!["  ".into()];
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::InvalidChains(_))));

        let mut cfg = Config::default();
        cfg.chains[1].rpc_urls.push("not a url".into());
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::InvalidUrl(_))));

        let mut cfg = Config::default();
        cfg.liquidity.slippage_bps = 10_001;
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn plain_env_overrides() {
        let mut cfg = Config::default();
        apply_plain_env(&mut cfg, |name| match name {
            "NEXT_PUBLIC_BSC_RPC" => Some("https://bsc.example.org".into()),
            "ZKME_APP_ID" => Some("app-1".into()),
            "ZKME_PROGRAM_NO" => Some(" ".into()),
            _ => None,
        });
        let bsc = cfg.chain(BSC_CHAIN_ID).unwrap();
        assert_eq!(bsc.rpc_urls[0], "https://bsc.example.org");
        assert_eq!(cfg.kyc.app_id.as_deref(), Some("app-1"));
        assert_eq!(cfg.kyc.program_no, None);
        assert_eq!(cfg.chain(MAINNET_CHAIN_ID).unwrap().rpc_urls[0], "https://eth.llamarpc.com");
    }

    #[test]
    fn loads_file_and_redacts_secrets() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
environment = "staging"

[wallet]
private_key = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"

[liquidity]
slippage_bps = 50
deadline = "5m"
approval = "exact"
"#
        )
        .unwrap();

        let cfg = load(Some(file.path())).unwrap();
        assert_eq!(cfg.app.environment, "staging");
        assert_eq!(cfg.liquidity.slippage_bps, 50);
        assert_eq!(cfg.liquidity.deadline, Duration::from_secs(300));
        assert_eq!(cfg.liquidity.approval, ApprovalPolicy::Exact);
        assert_eq!(cfg.market.price_ttl, Duration::from_secs(300));
        assert_eq!(cfg.chains.len(), 2);

        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("4c0883a6"));
    }

    #[test]
    fn example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/launchpad.example.toml");
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.presale.sweep_duration, Duration::from_secs(30 * 86_400));
        assert_eq!(cfg.market.coingecko_ids.get("BNB").map(String::as_str), Some("binancecoin"));
        assert_eq!(cfg.outbox.path.as_deref(), Some(Path::new("var/outbox.json")));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(matches!(
            load(Some(Path::new("/definitely/not/here.toml"))),
            Err(ConfigError::PathNotFound(_))
        ));
    }
}
