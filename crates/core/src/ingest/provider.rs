use crate::config::Settings;
use crate::ingest::types::RawSnapshot;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_PATH: &str = "/v1/bhavcopy";

/// Source of the daily per-security snapshot for a trade date. The trade date is
/// passed through verbatim; validating its format is the provider's job.
#[async_trait::async_trait]
pub trait SnapshotProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<RawSnapshot>;
}

/// Picks a provider from `SNAPSHOT_SOURCE` (`nse` by default, `http`, or `file`).
pub fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn SnapshotProvider>> {
    let source = settings
        .snapshot_source
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "nse".to_string());

    let provider: Arc<dyn SnapshotProvider> = match source.as_str() {
        "nse" => Arc::new(crate::ingest::nse::NseBhavcopyClient::from_settings(settings)?),
        "http" => Arc::new(HttpJsonSnapshotProvider::from_settings(settings)?),
        "file" => Arc::new(crate::ingest::file::FileSnapshotProvider::from_dir(
            settings.require_snapshot_dir()?,
        )),
        other => anyhow::bail!("unknown SNAPSHOT_SOURCE {other:?} (expected nse, http or file)"),
    };
    Ok(provider)
}

pub(crate) fn env_timeout() -> Duration {
    let secs = std::env::var("FETCH_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

pub(crate) fn env_retries() -> u32 {
    std::env::var("FETCH_RETRIES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_RETRIES)
        .max(1)
}

/// Runs `op` up to `retries` times with 1s, 2s, 4s... backoff between attempts.
pub(crate) async fn with_retries<T, F, Fut>(what: &str, retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= retries {
                    return Err(err);
                }
                let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?backoff, error = %err, "{what} failed; retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Generic provider for services that return the snapshot as a JSON array of row
/// objects (or `{"data": [...]}`).
#[derive(Debug, Clone)]
pub struct HttpJsonSnapshotProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
}

impl HttpJsonSnapshotProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_snapshot_http_base_url()?.to_string();
        let api_key = settings.snapshot_http_api_key.clone();

        let path = std::env::var("SNAPSHOT_HTTP_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(env_timeout())
            .build()
            .context("failed to build snapshot http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries: env_retries(),
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, trade_date: &str) -> Result<RawSnapshot> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[("trade_date", trade_date)])
            .send()
            .await
            .context("snapshot provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read snapshot provider response")?;
        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("snapshot provider response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("snapshot provider HTTP {status}: {raw_json}");
        }

        parse_records_body(&raw_json)
    }
}

fn parse_records_body(body: &Value) -> Result<RawSnapshot> {
    let records = match body {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .context("snapshot provider object response has no `data` array")?,
        other => anyhow::bail!("unexpected snapshot provider response shape: {other}"),
    };
    RawSnapshot::from_json_records(records)
}

#[async_trait::async_trait]
impl SnapshotProvider for HttpJsonSnapshotProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<RawSnapshot> {
        let snapshot = with_retries("snapshot fetch", self.retries, || {
            self.fetch_once(trade_date)
        })
        .await?;
        tracing::info!(
            provider = self.provider_name(),
            trade_date,
            rows = snapshot.len(),
            columns = snapshot.columns().len(),
            "fetched snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_array_and_data_wrapped_bodies() {
        let rows = json!([{"SYMBOL": "TCS", "CLOSE_PRICE": 3520.5}]);
        let snap = parse_records_body(&rows).unwrap();
        assert_eq!(snap.len(), 1);

        let wrapped = json!({"data": [{"SYMBOL": "TCS"}, {"SYMBOL": "INFY"}]});
        let snap = parse_records_body(&wrapped).unwrap();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn rejects_scalar_bodies() {
        assert!(parse_records_body(&json!("nope")).is_err());
        assert!(parse_records_body(&json!({"rows": []})).is_err());
    }

    #[tokio::test]
    async fn with_retries_returns_last_error_after_exhausting_attempts() {
        let mut calls = 0u32;
        let res: Result<()> = with_retries("test op", 1, || {
            calls += 1;
            async { anyhow::bail!("boom") }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
