//! Binance USDT-M futures REST client
//!
//! Public market data (klines, exchange info) needs no credentials. Account
//! and order endpoints are signed with HMAC-SHA256 over the query string.
//!
//! Every request passes the circuit breaker. Reads are retried with
//! exponential backoff; order placement and account changes are sent once so
//! a timeout can never duplicate an order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::Credentials;
use super::types::*;
use crate::common::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::ExchangeConfig;
use crate::Side;

pub const MAINNET_BASE_URL: &str = "https://fapi.binance.com";
pub const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";

/// Maximum klines per request (futures endpoint limit is 1500)
pub const MAX_KLINES_PER_REQUEST: u32 = 1500;

/// Delay between paginated history requests (ms)
const PAGE_DELAY_MS: u64 = 100;

/// Trigger order kinds used for brackets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    TakeProfit,
    Stop,
}

impl TriggerKind {
    fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::TakeProfit => "TAKE_PROFIT_MARKET",
            TriggerKind::Stop => "STOP_MARKET",
        }
    }
}

fn order_side(side: Side) -> &'static str {
    match side {
        Side::Long => "BUY",
        Side::Short => "SELL",
    }
}

/// Binance futures API client
#[derive(Clone)]
pub struct BinanceFuturesClient {
    http_client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    max_retries: u32,
    recv_window_ms: u64,
}

impl BinanceFuturesClient {
    fn build(
        config: &ExchangeConfig,
        base_url: &str,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build HTTP client")?;

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            cool_off: Duration::from_secs(config.circuit_timeout_secs),
            ..Default::default()
        });

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            circuit_breaker: Arc::new(Mutex::new(breaker)),
            max_retries: config.max_retries,
            recv_window_ms,
        })
    }

    /// Client for public market data only
    pub fn public(config: &ExchangeConfig, testnet: bool) -> Result<Self> {
        let base = if testnet { TESTNET_BASE_URL } else { MAINNET_BASE_URL };
        Self::build(config, base, None, 5000)
    }

    /// Client able to call signed endpoints
    pub fn authenticated(
        config: &ExchangeConfig,
        credentials: Credentials,
        testnet: bool,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let base = if testnet { TESTNET_BASE_URL } else { MAINNET_BASE_URL };
        Self::build(config, base, Some(credentials), recv_window_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run `operation` behind the circuit breaker, retrying up to `retries`
    /// extra times with 1s, 2s, 4s... backoff
    async fn guarded<F, Fut, T>(&self, retries: u32, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.allow_request() {
                bail!("Circuit breaker is open, rejecting request");
            }
        }

        let mut last_error = None;
        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                debug!("Retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    self.circuit_breaker.lock().await.on_success();
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Request failed (attempt {}/{}): {:#}", attempt + 1, retries + 1, e);
                    last_error = Some(e);
                }
            }
        }

        self.circuit_breaker.lock().await.on_failure();
        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;
        if !status.is_success() {
            if let Ok(api) = serde_json::from_str::<ApiError>(&text) {
                bail!("Binance API error {} (code {}): {}", status, api.code, api.msg);
            }
            bail!("Binance API error {}: {}", status, text);
        }
        serde_json::from_str(&text).with_context(|| format!("Failed to parse response: {}", text))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.guarded(self.max_retries, || {
            let request = self.http_client.get(&url).query(params);
            async move {
                let response = request
                    .send()
                    .await
                    .context("Failed to send request to Binance")?;
                Self::parse_response(response).await
            }
        })
        .await
    }

    /// Query string with recvWindow, timestamp and signature appended
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .context("Signed endpoint called on a public client")?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = credentials.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::RequestBuilder> {
        let query = self.signed_query(params)?;
        let api_key = self
            .credentials
            .as_ref()
            .map(|c| c.api_key().to_string())
            .unwrap_or_default();
        let url = format!("{}{}?{}", self.base_url, path, query);
        Ok(self
            .http_client
            .request(method, url)
            .header("X-MBX-APIKEY", api_key))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        retries: u32,
    ) -> Result<T> {
        self.guarded(retries, || {
            // Fresh timestamp per attempt
            let request = self.signed_request(method.clone(), path, params);
            let label = format!("{} {}", method, path);
            async move {
                let response = request?
                    .send()
                    .await
                    .with_context(|| format!("Failed to send {}", label))?;
                Self::parse_response(response).await
            }
        })
        .await
    }

    // ==================== PUBLIC ENDPOINTS ====================

    /// Fetch klines (candlestick data)
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<BinanceKline>> {
        let limit = limit
            .unwrap_or(MAX_KLINES_PER_REQUEST)
            .min(MAX_KLINES_PER_REQUEST);
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }

        debug!(symbol, interval, limit, "Fetching klines");
        let raw: Vec<Vec<serde_json::Value>> = self.public_get("/fapi/v1/klines", &params).await?;
        Ok(raw.iter().filter_map(|row| BinanceKline::from_raw(row)).collect())
    }

    /// Fetch `[start_ms, end_ms)` by paging forward from the start
    pub async fn fetch_history(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<BinanceKline>> {
        let mut all_klines: Vec<BinanceKline> = Vec::new();
        let mut cursor = start_ms;

        while cursor < end_ms {
            let klines = self
                .get_klines(symbol, interval, Some(cursor), Some(end_ms - 1), None)
                .await
                .with_context(|| format!("Failed to fetch {} klines from {}", symbol, cursor))?;

            let Some(last) = klines.last() else {
                break;
            };
            cursor = last.open_time + 1;
            info!(
                "  Fetched {} klines up to {}",
                klines.len(),
                last.to_bar().map(|b| b.timestamp.to_string()).unwrap_or_default()
            );
            all_klines.extend(klines);

            sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        all_klines.sort_by_key(|k| k.open_time);
        all_klines.dedup_by_key(|k| k.open_time);
        Ok(all_klines)
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        self.public_get("/fapi/v1/exchangeInfo", &[]).await
    }

    /// Lot/price filters for a symbol; errors when the symbol is unknown
    pub async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let info = self.exchange_info().await?;
        let symbol_info = info
            .find(symbol)
            .with_context(|| format!("Futures symbol '{}' not found", symbol))?;
        SymbolFilters::from_symbol_info(symbol_info)
    }

    // ==================== SIGNED ENDPOINTS ====================

    pub async fn balances(&self) -> Result<Vec<AccountBalance>> {
        self.signed(Method::GET, "/fapi/v2/balance", &[], self.max_retries)
            .await
    }

    /// Available balance of `asset`, zero when the asset is absent
    pub async fn available_balance(&self, asset: &str) -> Result<f64> {
        let balances = self.balances().await?;
        match balances.iter().find(|b| b.asset == asset) {
            Some(b) => b
                .available_balance
                .parse()
                .with_context(|| format!("Bad availableBalance '{}'", b.available_balance)),
            None => Ok(0.0),
        }
    }

    pub async fn position(&self, symbol: &str) -> Result<PositionInfo> {
        let positions: Vec<PositionRisk> = self
            .signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
                self.max_retries,
            )
            .await?;
        match positions.iter().find(|p| p.symbol == symbol) {
            Some(p) => PositionInfo::try_from(p),
            None => Ok(PositionInfo::default()),
        }
    }

    pub async fn change_margin_type(&self, symbol: &str, margin_type: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/marginType",
                &[
                    ("symbol", symbol.to_string()),
                    ("marginType", margin_type.to_string()),
                ],
                0,
            )
            .await?;
        Ok(())
    }

    pub async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
                0,
            )
            .await?;
        Ok(())
    }

    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResponse> {
        self.signed(
            Method::POST,
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", order_side(side).to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
            ],
            0,
        )
        .await
    }

    /// Trigger order closing the whole position held on `position_side`
    pub async fn place_close_trigger(
        &self,
        symbol: &str,
        position_side: Side,
        kind: TriggerKind,
        stop_price: Decimal,
    ) -> Result<OrderResponse> {
        let closing = match position_side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        self.signed(
            Method::POST,
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", order_side(closing).to_string()),
                ("type", kind.as_str().to_string()),
                ("stopPrice", stop_price.to_string()),
                ("closePosition", "true".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("workingType", "CONTRACT_PRICE".to_string()),
            ],
            0,
        )
        .await
    }

    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_string())],
                0,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_urls() {
        let config = ExchangeConfig::default();
        let client = BinanceFuturesClient::public(&config, false).unwrap();
        assert_eq!(client.base_url(), MAINNET_BASE_URL);
        let client = BinanceFuturesClient::public(&config, true).unwrap();
        assert_eq!(client.base_url(), TESTNET_BASE_URL);
    }

    #[test]
    fn test_signed_query_layout() {
        let config = ExchangeConfig::default();
        let client = BinanceFuturesClient::authenticated(
            &config,
            Credentials::new("key", "secret"),
            true,
            5000,
        )
        .unwrap();
        let query = client
            .signed_query(&[("symbol", "BTCUSDT".to_string())])
            .unwrap();
        assert!(query.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        let signature = query.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_public_client_cannot_sign() {
        let client = BinanceFuturesClient::public(&ExchangeConfig::default(), false).unwrap();
        assert!(client.signed_query(&[]).is_err());
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(order_side(Side::Long), "BUY");
        assert_eq!(TriggerKind::Stop.as_str(), "STOP_MARKET");
    }
}
