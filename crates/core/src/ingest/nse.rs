use crate::config::Settings;
use crate::ingest::provider::{env_retries, env_timeout, with_retries, SnapshotProvider};
use crate::ingest::types::RawSnapshot;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_ARCHIVE_BASE_URL: &str = "https://nsearchives.nseindia.com";

// NSE rejects requests without a browser-like user agent.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Downloads the daily cash-market bhavcopy (UDiFF format) from the NSE archives.
#[derive(Debug, Clone)]
pub struct NseBhavcopyClient {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl NseBhavcopyClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .nse_archive_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(env_timeout())
            .build()
            .context("failed to build NSE http client")?;

        Ok(Self {
            http,
            base_url,
            retries: env_retries(),
        })
    }

    pub fn archive_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/content/cm/BhavCopy_NSE_CM_0_0_0_{}_F_0000.csv.zip",
            self.base_url.trim_end_matches('/'),
            date.format("%Y%m%d")
        )
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers
    }

    async fn fetch_zip_once(&self, url: &str) -> Result<Vec<u8>> {
        let res = self
            .http
            .get(url)
            .headers(Self::headers())
            .send()
            .await
            .context("bhavcopy download failed")?;

        let status = res.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Holidays, weekends and future dates have no archive.
            anyhow::bail!("no bhavcopy published at {url}");
        }
        let bytes = res.bytes().await.context("read bhavcopy bytes failed")?;
        if !status.is_success() {
            anyhow::bail!("bhavcopy HTTP {status}");
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait::async_trait]
impl SnapshotProvider for NseBhavcopyClient {
    fn provider_name(&self) -> &'static str {
        "nse_bhavcopy"
    }

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<RawSnapshot> {
        let date = parse_trade_date(trade_date)?;
        let url = self.archive_url(date);

        let bytes = with_retries("bhavcopy download", self.retries, || {
            self.fetch_zip_once(&url)
        })
        .await?;

        let snapshot = tokio::task::spawn_blocking(move || unzip_and_parse_bhavcopy(&bytes))
            .await
            .context("join unzip task failed")??;

        tracing::info!(
            provider = self.provider_name(),
            %date,
            rows = snapshot.len(),
            columns = snapshot.columns().len(),
            "fetched bhavcopy"
        );
        Ok(snapshot)
    }
}

/// Accepts `DD-MM-YYYY` (the form users type), `DD/MM/YYYY` and ISO `YYYY-MM-DD`.
pub fn parse_trade_date(s: &str) -> Result<NaiveDate> {
    let t = s.trim();
    anyhow::ensure!(!t.is_empty(), "trade date is required");
    for fmt in ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Ok(d);
        }
    }
    anyhow::bail!("invalid trade date {t:?}; expected DD-MM-YYYY")
}

fn unzip_and_parse_bhavcopy(zip_bytes: &[u8]) -> Result<RawSnapshot> {
    use std::io::{Cursor, Read};

    let reader = Cursor::new(zip_bytes);
    let mut zip = zip::ZipArchive::new(reader).context("open zip archive failed")?;
    anyhow::ensure!(zip.len() >= 1, "zip has no entries");

    let mut csv_idx: Option<usize> = None;
    for i in 0..zip.len() {
        let name = {
            let f = zip.by_index(i).context("open zip entry failed")?;
            f.name().to_string()
        };
        if name.to_ascii_lowercase().ends_with(".csv") {
            csv_idx = Some(i);
            break;
        }
    }
    let idx = csv_idx.unwrap_or(0);

    let mut file = zip.by_index(idx).context("open zip entry failed")?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context("read zip entry failed")?;

    RawSnapshot::from_csv_reader(buf.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            w.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            w.write_all(body.as_bytes()).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn parses_supported_trade_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 7, 5).unwrap();
        assert_eq!(parse_trade_date("05-07-2024").unwrap(), expected);
        assert_eq!(parse_trade_date("05/07/2024").unwrap(), expected);
        assert_eq!(parse_trade_date(" 2024-07-05 ").unwrap(), expected);
        assert!(parse_trade_date("").is_err());
        assert!(parse_trade_date("July 5").is_err());
    }

    #[test]
    fn builds_udiff_archive_url() {
        let settings = Settings {
            sentry_dsn: None,
            snapshot_source: None,
            nse_archive_base_url: Some("https://archives.example/".into()),
            snapshot_http_base_url: None,
            snapshot_http_api_key: None,
            snapshot_dir: None,
            history_base_url: None,
            history_disabled: true,
            export_dir: None,
        };
        let client = NseBhavcopyClient::from_settings(&settings).unwrap();
        let url = client.archive_url(NaiveDate::from_ymd_opt(2024, 7, 5).unwrap());
        assert_eq!(
            url,
            "https://archives.example/content/cm/BhavCopy_NSE_CM_0_0_0_20240705_F_0000.csv.zip"
        );
    }

    #[test]
    fn unzips_first_csv_entry() {
        let body = "TradDt,TckrSymb,SctySrs,OpnPric,ClsPric,TtlTrfVal\n\
                    2024-07-05,TCS,EQ,3990.00,4015.55,12345678.9\n\
                    2024-07-05,INFY,EQ,1650,1642.1,9876543.2\n";
        let bytes = zip_with(&[("readme.txt", "ignore me"), ("bhav.csv", body)]);

        let snap = unzip_and_parse_bhavcopy(&bytes).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.column_index("TckrSymb"), Some(1));
    }

    #[test]
    fn rejects_non_zip_payload() {
        assert!(unzip_and_parse_bhavcopy(b"<html>blocked</html>").is_err());
    }
}
