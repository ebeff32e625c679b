pub mod dashboard;
pub mod export;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sentry_dsn: Option<String>,
        pub snapshot_source: Option<String>,
        pub nse_archive_base_url: Option<String>,
        pub snapshot_http_base_url: Option<String>,
        pub snapshot_http_api_key: Option<String>,
        pub snapshot_dir: Option<String>,
        pub history_base_url: Option<String>,
        pub history_disabled: bool,
        pub export_dir: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                snapshot_source: std::env::var("SNAPSHOT_SOURCE").ok(),
                nse_archive_base_url: std::env::var("NSE_ARCHIVE_BASE_URL").ok(),
                snapshot_http_base_url: std::env::var("SNAPSHOT_HTTP_BASE_URL").ok(),
                snapshot_http_api_key: std::env::var("SNAPSHOT_HTTP_API_KEY").ok(),
                snapshot_dir: std::env::var("SNAPSHOT_DIR").ok(),
                history_base_url: std::env::var("HISTORY_BASE_URL").ok(),
                history_disabled: std::env::var("HISTORY_DISABLED")
                    .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                    .unwrap_or(false),
                export_dir: std::env::var("EXPORT_DIR").ok(),
            })
        }

        pub fn require_snapshot_http_base_url(&self) -> anyhow::Result<&str> {
            self.snapshot_http_base_url
                .as_deref()
                .context("SNAPSHOT_HTTP_BASE_URL is required")
        }

        pub fn require_snapshot_dir(&self) -> anyhow::Result<&str> {
            self.snapshot_dir
                .as_deref()
                .context("SNAPSHOT_DIR is required")
        }

        pub fn export_dir_or_default(&self) -> std::path::PathBuf {
            self.export_dir
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("bhavdesk-exports"))
        }
    }
}
