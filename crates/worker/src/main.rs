use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bhavdesk_core::dashboard::{Dashboard, DashboardOptions, DashboardRequest};
use bhavdesk_core::export::PageExporter;
use bhavdesk_core::ingest::file::FileSnapshotProvider;
use bhavdesk_core::ingest::SnapshotProvider;
use bhavdesk_core::pipeline::aggregate::AggregateScope;
use bhavdesk_core::time::nse_market;

#[derive(Debug, Parser)]
#[command(name = "bhavdesk_worker")]
struct Args {
    /// Trade date (DD-MM-YYYY or YYYY-MM-DD). Defaults to the latest NSE session with a
    /// published bhavcopy.
    #[arg(long)]
    trade_date: Option<String>,

    /// Symbol to look up (case-insensitive).
    #[arg(long)]
    symbol: Option<String>,

    /// 1-based page to display and export.
    #[arg(long, default_value_t = 1)]
    page: i64,

    /// Read the snapshot from this CSV or JSON file instead of the configured provider.
    #[arg(long)]
    snapshot_file: Option<PathBuf>,

    /// Directory for the page export. Defaults to EXPORT_DIR.
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Compute aggregates over the whole table instead of the current page.
    #[arg(long)]
    full_table_aggregates: bool,

    /// Skip the price history fetch for a found symbol.
    #[arg(long)]
    no_history: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = bhavdesk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let trade_date =
        nse_market::resolve_trade_date(args.trade_date.as_deref(), chrono::Utc::now())?;
    let trade_date = nse_market::format_trade_date(trade_date);

    let dashboard = build_dashboard(&settings, &args)?;

    let mut req = DashboardRequest::new(trade_date.clone()).with_page(args.page);
    if let Some(symbol) = &args.symbol {
        req = req.with_symbol(symbol.clone());
    }

    let view = match dashboard.run(&req).await {
        Ok(view) => view,
        Err(err) => {
            if let Some(source) = &err.source {
                sentry_anyhow::capture_anyhow(source);
            }
            tracing::error!(%trade_date, kind = ?err.kind, error = %err, "dashboard run failed");
            return Err(anyhow::Error::new(err));
        }
    };

    for notice in &view.notices {
        tracing::warn!(%trade_date, %notice, "dashboard notice");
    }
    if let (Some(exporter), Some(export)) = (dashboard.exporter(), &view.export) {
        tracing::info!(
            path = %exporter.dir().join(&export.file_name).display(),
            rows = export.rows,
            "page exported"
        );
    }

    let out = serde_json::to_string_pretty(&view).context("failed to serialize view")?;
    println!("{out}");
    Ok(())
}

fn build_dashboard(
    settings: &bhavdesk_core::config::Settings,
    args: &Args,
) -> anyhow::Result<Dashboard> {
    let snapshots: Arc<dyn SnapshotProvider> = match &args.snapshot_file {
        Some(path) => Arc::new(FileSnapshotProvider::from_file(path.clone())),
        None => bhavdesk_core::ingest::provider_from_settings(settings)?,
    };

    let mut options = DashboardOptions::from_env()?;
    if args.full_table_aggregates {
        options.scope = AggregateScope::FullTable;
    }

    let export_dir = args
        .export_dir
        .clone()
        .unwrap_or_else(|| settings.export_dir_or_default());
    let exporter = PageExporter::from_env(export_dir)?;

    let mut dashboard = Dashboard::new(snapshots, options).with_exporter(exporter);
    if !args.no_history {
        if let Some(history) = bhavdesk_core::history::provider_from_settings(settings)? {
            dashboard = dashboard.with_history(history);
        }
    }
    Ok(dashboard)
}

fn init_sentry(settings: &bhavdesk_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
