//! Multi-day closing prices for a single symbol, shown next to a lookup hit.

use crate::config::Settings;
use crate::ingest::provider::{env_retries, env_timeout, with_retries};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_RANGE: &str = "1mo";
const NSE_SUFFIX: &str = ".NS";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

#[async_trait::async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_history(&self, symbol: &str) -> Result<PriceHistory>;
}

/// Daily closes for the last month from the Yahoo chart endpoint, for the
/// NSE listing of the symbol (`<SYMBOL>.NS`).
#[derive(Debug, Clone)]
pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
    range: String,
    retries: u32,
}

impl YahooChartClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .history_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let range = std::env::var("HISTORY_RANGE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RANGE.to_string());

        let http = reqwest::Client::builder()
            .timeout(env_timeout())
            .build()
            .context("failed to build history http client")?;

        Ok(Self {
            http,
            base_url,
            range,
            retries: env_retries(),
        })
    }

    fn url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}{}",
            self.base_url.trim_end_matches('/'),
            symbol,
            NSE_SUFFIX
        )
    }

    async fn fetch_once(&self, symbol: &str) -> Result<PriceHistory> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static("Mozilla/5.0"));

        let res = self
            .http
            .get(self.url(symbol))
            .headers(headers)
            .query(&[("range", self.range.as_str()), ("interval", "1d")])
            .send()
            .await
            .context("history request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read history response")?;
        if !status.is_success() {
            anyhow::bail!("history HTTP {status}: {text}");
        }

        let body = serde_json::from_str::<ChartResponse>(&text)
            .context("failed to parse history response")?;
        parse_chart(symbol, body)
    }
}

#[async_trait::async_trait]
impl PriceHistoryProvider for YahooChartClient {
    fn provider_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch_history(&self, symbol: &str) -> Result<PriceHistory> {
        with_retries("history fetch", self.retries, || self.fetch_once(symbol)).await
    }
}

/// `None` when history is switched off with `HISTORY_DISABLED`.
pub fn provider_from_settings(
    settings: &Settings,
) -> Result<Option<std::sync::Arc<dyn PriceHistoryProvider>>> {
    if settings.history_disabled {
        return Ok(None);
    }
    Ok(Some(std::sync::Arc::new(YahooChartClient::from_settings(
        settings,
    )?)))
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn parse_chart(symbol: &str, body: ChartResponse) -> Result<PriceHistory> {
    if let Some(err) = body.chart.error.filter(|e| !e.is_null()) {
        anyhow::bail!("history provider error for {symbol}: {err}");
    }

    let result = body
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .with_context(|| format!("history response has no result for {symbol}"))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let offset = result.meta.gmtoffset;
    let points = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            // Halted sessions come back as null closes.
            let close = close.filter(|c| c.is_finite())?;
            let date = DateTime::from_timestamp(ts + offset, 0)?.date_naive();
            Some(PricePoint { date, close })
        })
        .collect();

    Ok(PriceHistory {
        symbol: symbol.to_string(),
        points,
    })
}
