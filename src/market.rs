//! Token balances and USD prices with per-kind TTL caches.
//!
//! Prices come from CoinGecko, balances from the chain. Both caches are keyed
//! by ticker symbol and cleared wholesale by [`MarketData::reset`], which the
//! context calls on wallet disconnect.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{Address, U256},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    config::Market as MarketConfig,
    contracts::{read, Bindings},
    error::LaunchpadError,
    provider::{RpcSelector, WalletAdapter},
    units::{format_units, to_f64},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsdQuote {
    pub usd: f64,
    pub change_24h: Option<f64>,
}

/// What a tracked symbol's balance means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum BalanceKind {
    /// Wallet balance of the chain's native coin.
    Native,
    /// Wallet balance of an ERC-20.
    Erc20(Address),
    /// Total supply, standing in for a project token's balance.
    Supply(Address),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedToken {
    pub symbol: String,
    pub chain_id: u64,
    pub kind: BalanceKind,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSnapshot {
    pub symbol: String,
    pub balance: U256,
    pub decimals: u8,
    pub formatted: String,
    pub usd_price: Option<f64>,
    pub usd_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { tokens: usize },
    /// Another refresh was already running.
    Skipped,
}

#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    /// USD quotes by CoinGecko coin id. Unknown ids are simply absent.
    async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, UsdQuote>, LaunchpadError>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync + 'static {
    async fn balance(&self, token: &TrackedToken, owner: Option<Address>) -> Result<U256, LaunchpadError>;
}

/// CoinGecko `simple/price` client.
#[derive(Clone)]
pub struct CoinGecko {
    http: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

impl CoinGecko {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LaunchpadError> {
        let mut base = Url::parse(base_url).map_err(|e| LaunchpadError::PriceFeed(format!("{base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LaunchpadError::PriceFeed(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn url(&self, ids: &[String]) -> Result<Url, LaunchpadError> {
        let mut url = self.base.join("simple/price").map_err(|e| LaunchpadError::PriceFeed(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("vs_currencies", "usd")
            .append_pair("include_24hr_change", "true");
        Ok(url)
    }
}

#[async_trait]
impl PriceSource for CoinGecko {
    async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, UsdQuote>, LaunchpadError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.url(ids)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LaunchpadError::PriceFeed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LaunchpadError::PriceFeed(format!("{status}: {body}")));
        }
        let parsed: HashMap<String, SimplePrice> =
            resp.json().await.map_err(|e| LaunchpadError::PriceFeed(e.to_string()))?;
        Ok(parsed
            .into_iter()
            .map(|(id, p)| (id, UsdQuote { usd: p.usd, change_24h: p.usd_24h_change }))
            .collect())
    }
}

/// Balances over the selected read endpoint of each chain.
pub struct ChainBalances {
    selector: Arc<RpcSelector>,
}

impl ChainBalances {
    pub fn new(selector: Arc<RpcSelector>) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl BalanceSource for ChainBalances {
    async fn balance(&self, token: &TrackedToken, owner: Option<Address>) -> Result<U256, LaunchpadError> {
        let provider = self.selector.read_provider(token.chain_id).await?.provider;
        match token.kind {
            BalanceKind::Native => {
                let owner = owner.ok_or(LaunchpadError::WalletNotConnected)?;
                provider
                    .get_balance(owner, None)
                    .await
                    .map_err(|e| LaunchpadError::Rpc(e.to_string()))
            }
            BalanceKind::Erc20(address) => {
                let owner = owner.ok_or(LaunchpadError::WalletNotConnected)?;
                read(Bindings::new(provider).token(address).balance_of(owner)).await
            }
            BalanceKind::Supply(address) => read(Bindings::new(provider).token(address).total_supply()).await,
        }
    }
}

struct Cached<T> {
    value: T,
    at: Instant,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// Clears the fetching flag when the refresh ends, however it ends.
struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MarketData<P, B> {
    prices: P,
    balances: B,
    wallet: Arc<WalletAdapter>,
    settings: MarketConfig,
    tracked: Mutex<Vec<TrackedToken>>,
    price_cache: Mutex<HashMap<String, Cached<UsdQuote>>>,
    balance_cache: Mutex<HashMap<String, Cached<U256>>>,
    fetching: AtomicBool,
    generation: AtomicU64,
}

impl<P: PriceSource, B: BalanceSource> MarketData<P, B> {
    pub fn new(prices: P, balances: B, wallet: Arc<WalletAdapter>, settings: MarketConfig) -> Self {
        Self {
            prices,
            balances,
            wallet,
            settings,
            tracked: Mutex::new(Vec::new()),
            price_cache: Mutex::new(HashMap::new()),
            balance_cache: Mutex::new(HashMap::new()),
            fetching: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Add or replace a tracked symbol.
    pub fn track(&self, token: TrackedToken) {
        let mut tracked = self.tracked.lock();
        tracked.retain(|t| t.symbol != token.symbol);
        tracked.push(token);
    }

    pub fn tracked(&self) -> Vec<TrackedToken> {
        self.tracked.lock().clone()
    }

    fn tracked_token(&self, symbol: &str) -> Option<TrackedToken> {
        self.tracked.lock().iter().find(|t| t.symbol == symbol).cloned()
    }

    /// Drop every cached price and balance.
    pub fn reset(&self) {
        self.price_cache.lock().clear();
        self.balance_cache.lock().clear();
        debug!(target: "market", "caches cleared");
    }

    /// USD quotes for `symbols`; symbols without a CoinGecko id are omitted.
    /// Stale entries are fetched in one request.
    #[instrument(skip_all, fields(symbols = symbols.len()))]
    pub async fn prices(&self, symbols: &[&str]) -> Result<HashMap<String, UsdQuote>, LaunchpadError> {
        let mut out = HashMap::new();
        let mut stale: Vec<(String, String)> = Vec::new();
        {
            let cache = self.price_cache.lock();
            for symbol in symbols {
                let symbol = symbol.to_uppercase();
                match cache.get(&symbol).and_then(|c| c.fresh(self.settings.price_ttl)) {
                    Some(q) => {
                        out.insert(symbol, q);
                    }
                    None => {
                        if let Some(id) = self.settings.coingecko_ids.get(&symbol) {
                            stale.push((symbol, id.clone()));
                        }
                    }
                }
            }
        }
        if stale.is_empty() {
            return Ok(out);
        }

        let ids: Vec<String> = stale.iter().map(|(_, id)| id.clone()).collect();
        let fetched = self.prices.usd_prices(&ids).await?;
        let now = Instant::now();
        let mut cache = self.price_cache.lock();
        for (symbol, id) in stale {
            if let Some(q) = fetched.get(&id) {
                cache.insert(symbol.clone(), Cached { value: *q, at: now });
                out.insert(symbol, *q);
            }
        }
        Ok(out)
    }

    pub async fn price(&self, symbol: &str) -> Result<Option<UsdQuote>, LaunchpadError> {
        Ok(self.prices(&[symbol]).await?.remove(&symbol.to_uppercase()))
    }

    /// Balance of a tracked symbol, from cache while fresh.
    pub async fn balance(&self, symbol: &str) -> Result<U256, LaunchpadError> {
        if let Some(v) = self.balance_cache.lock().get(symbol).and_then(|c| c.fresh(self.settings.balance_ttl)) {
            return Ok(v);
        }
        let token = self
            .tracked_token(symbol)
            .ok_or_else(|| LaunchpadError::InvalidState(format!("{symbol} is not tracked")))?;
        let value = self.balances.balance(&token, self.wallet.address()).await?;
        self.balance_cache
            .lock()
            .insert(token.symbol, Cached { value, at: Instant::now() });
        Ok(value)
    }

    /// Balance, formatted amount and USD value. A price feed failure leaves
    /// the USD fields empty.
    pub async fn snapshot(&self, symbol: &str) -> Result<TokenSnapshot, LaunchpadError> {
        let token = self
            .tracked_token(symbol)
            .ok_or_else(|| LaunchpadError::InvalidState(format!("{symbol} is not tracked")))?;
        let balance = self.balance(symbol).await?;
        let usd_price = match self.price(symbol).await {
            Ok(q) => q.map(|q| q.usd),
            Err(e) => {
                warn!(target: "market", symbol, error = %e, "price unavailable");
                None
            }
        };
        Ok(TokenSnapshot {
            symbol: token.symbol,
            balance,
            decimals: token.decimals,
            formatted: format_units(balance, token.decimals),
            usd_price,
            usd_value: usd_price.map(|p| p * to_f64(balance, token.decimals)),
        })
    }

    /// Refetch every tracked balance. Overlapping calls are skipped rather
    /// than queued.
    #[instrument(skip_all)]
    pub async fn refresh_balances(&self) -> Result<RefreshOutcome, LaunchpadError> {
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "market", "refresh already running");
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = FetchGuard(&self.fetching);

        let owner = self.wallet.address();
        let tracked = self.tracked();
        let mut fresh = Vec::with_capacity(tracked.len());
        for token in &tracked {
            let value = self.balances.balance(token, owner).await?;
            fresh.push((token.symbol.clone(), value));
        }
        let now = Instant::now();
        let mut cache = self.balance_cache.lock();
        for (symbol, value) in fresh {
            cache.insert(symbol, Cached { value, at: now });
        }
        Ok(RefreshOutcome::Refreshed { tokens: tracked.len() })
    }

    /// Refresh after the debounce window. A later call inside the window
    /// supersedes this one.
    pub fn schedule_refresh(self: &Arc<Self>) -> JoinHandle<Option<RefreshOutcome>> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let this = Arc::clone(self);
        let window = self.settings.refresh_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if this.generation.load(Ordering::Acquire) != generation {
                return None;
            }
            match this.refresh_balances().await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(target: "market", error = %e, "balance refresh failed");
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingPrices {
        calls: AtomicUsize,
        requested: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PriceSource for Arc<CountingPrices> {
        async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, UsdQuote>, LaunchpadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().push(ids.to_vec());
            Ok(ids
                .iter()
                .filter(|id| id.as_str() != "tether")
                .map(|id| (id.clone(), UsdQuote { usd: 2.0, change_24h: Some(-1.5) }))
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingBalances {
        calls: AtomicUsize,
        /// When set, each call waits here after signalling `entered`.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl BalanceSource for Arc<CountingBalances> {
        async fn balance(&self, token: &TrackedToken, owner: Option<Address>) -> Result<U256, LaunchpadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            match token.kind {
                BalanceKind::Supply(_) => Ok(U256::exp10(24)),
                _ => owner.map(|_| U256::exp10(18) * 3).ok_or(LaunchpadError::WalletNotConnected),
            }
        }
    }

    type Market = MarketData<Arc<CountingPrices>, Arc<CountingBalances>>;

    fn market(balances: CountingBalances) -> (Arc<Market>, Arc<CountingPrices>, Arc<CountingBalances>) {
        let prices = Arc::new(CountingPrices::default());
        let balances = Arc::new(balances);
        let m = MarketData::new(prices.clone(), balances.clone(), testing::wallet(true), MarketConfig::default());
        m.track(TrackedToken { symbol: "BNB".into(), chain_id: 56, kind: BalanceKind::Native, decimals: 18 });
        m.track(TrackedToken {
            symbol: "PRJ".into(),
            chain_id: 56,
            kind: BalanceKind::Supply(Address::repeat_byte(0x70)),
            decimals: 18,
        });
        (Arc::new(m), prices, balances)
    }

    #[tokio::test(start_paused = true)]
    async fn prices_are_cached_for_five_minutes() {
        let (m, prices, _) = market(CountingBalances::default());

        let quotes = m.prices(&["bnb", "ETH", "PRJ"]).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes["BNB"].usd, 2.0);
        // PRJ has no coin id and is never requested
        assert_eq!(*prices.requested.lock(), vec![vec!["binancecoin".to_string(), "ethereum".to_string()]]);

        tokio::time::advance(Duration::from_secs(299)).await;
        m.price("BNB").await.unwrap();
        assert_eq!(prices.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        m.price("BNB").await.unwrap();
        assert_eq!(prices.calls.load(Ordering::SeqCst), 2);

        // feed knows no price for tether: absent, not cached, asked again
        assert!(m.price("USDT").await.unwrap().is_none());
        assert!(m.price("USDT").await.unwrap().is_none());
        assert_eq!(prices.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn balances_expire_and_reset_clears_everything() {
        let (m, prices, balances) = market(CountingBalances::default());

        assert_eq!(m.balance("BNB").await.unwrap(), U256::exp10(18) * 3);
        m.balance("BNB").await.unwrap();
        assert_eq!(balances.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        m.balance("BNB").await.unwrap();
        assert_eq!(balances.calls.load(Ordering::SeqCst), 2);

        m.price("BNB").await.unwrap();
        m.reset();
        m.balance("BNB").await.unwrap();
        m.price("BNB").await.unwrap();
        assert_eq!(balances.calls.load(Ordering::SeqCst), 3);
        assert_eq!(prices.calls.load(Ordering::SeqCst), 2);

        assert!(matches!(m.balance("DOGE").await, Err(LaunchpadError::InvalidState(_))));
    }

    #[tokio::test]
    async fn snapshot_values_balance_in_usd() {
        let (m, _, _) = market(CountingBalances::default());
        let snap = m.snapshot("BNB").await.unwrap();
        assert_eq!(snap.formatted, "3");
        assert_eq!(snap.usd_value, Some(6.0));

        let snap = m.snapshot("PRJ").await.unwrap();
        assert_eq!(snap.balance, U256::exp10(24));
        assert_eq!(snap.usd_price, None);
    }

    #[tokio::test]
    async fn overlapping_refresh_is_skipped() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (m, _, balances) =
            market(CountingBalances { gate: Some((entered.clone(), release.clone())), ..Default::default() });

        let first = tokio::spawn({
            let m = m.clone();
            async move { m.refresh_balances().await }
        });
        entered.notified().await;
        assert_eq!(m.refresh_balances().await.unwrap(), RefreshOutcome::Skipped);

        // two tracked tokens, each waits for a release
        release.notify_one();
        entered.notified().await;
        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Refreshed { tokens: 2 });
        assert_eq!(balances.calls.load(Ordering::SeqCst), 2);
        assert!(!m.fetching.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_refresh_requests_runs_once() {
        let (m, _, balances) = market(CountingBalances::default());
        let handles: Vec<_> = (0..3).map(|_| m.schedule_refresh()).collect();

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap());
        }
        assert_eq!(outcomes[..2], [None, None]);
        assert_eq!(outcomes[2], Some(RefreshOutcome::Refreshed { tokens: 2 }));
        assert_eq!(balances.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn coingecko_url_carries_query() {
        let cg = CoinGecko::new("https://api.coingecko.com/api/v3", Duration::from_secs(5)).unwrap();
        let url = cg.url(&["ethereum".into(), "binancecoin".into()]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.coingecko.com/api/v3/simple/price?ids=ethereum%2Cbinancecoin&vs_currencies=usd&include_24hr_change=true"
        );
    }

    #[test]
    fn simple_price_body() {
        let body = r#"{"ethereum":{"usd":3120.5,"usd_24h_change":-0.81},"tether":{"usd":1.0}}"#;
        let parsed: HashMap<String, SimplePrice> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["ethereum"].usd_24h_change, Some(-0.81));
        assert_eq!(parsed["tether"].usd_24h_change, None);
    }
}
