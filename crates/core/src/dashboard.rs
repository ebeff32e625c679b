use crate::config::Settings;
use crate::export::{ExportHandle, PageExporter};
use crate::history::{PriceHistory, PriceHistoryProvider};
use crate::ingest::{RawSnapshot, SnapshotProvider};
use crate::pipeline::aggregate::{compute_aggregates, AggregateScope, CategoryCount, DEFAULT_TOP_N};
use crate::pipeline::enrich::{enrich_snapshot, header_for, EnrichedRow};
use crate::pipeline::lookup::{lookup_symbol, normalize_symbol, LookupResult};
use crate::pipeline::paginate::{paginate, DEFAULT_PAGE_SIZE};
use crate::pipeline::schema::{resolve_snapshot, AliasTable, CanonicalColumns};
use crate::pipeline::PipelineError;
use anyhow::Context;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub page_size: usize,
    pub top_n: usize,
    pub scope: AggregateScope,
    pub aliases: AliasTable,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            top_n: DEFAULT_TOP_N,
            scope: AggregateScope::CurrentPage,
            aliases: AliasTable::default(),
        }
    }
}

impl DashboardOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self {
            aliases: AliasTable::from_env(),
            ..Self::default()
        };

        if let Ok(s) = std::env::var("PAGE_SIZE") {
            out.page_size = s
                .trim()
                .parse::<usize>()
                .with_context(|| format!("PAGE_SIZE must be a positive integer (got {s:?})"))?;
        }
        anyhow::ensure!(out.page_size >= 1, "PAGE_SIZE must be >= 1");

        if let Ok(s) = std::env::var("TOP_N") {
            out.top_n = s
                .trim()
                .parse::<usize>()
                .with_context(|| format!("TOP_N must be a non-negative integer (got {s:?})"))?;
        }

        if let Ok(s) = std::env::var("AGGREGATE_SCOPE") {
            out.scope = s.parse()?;
        }

        Ok(out)
    }
}

/// One dashboard request as submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardRequest {
    pub trade_date: String,
    pub stock_symbol: Option<String>,
    /// 1-based; not clamped by the caller.
    pub page: i64,
}

impl DashboardRequest {
    pub fn new(trade_date: impl Into<String>) -> Self {
        Self {
            trade_date: trade_date.into().trim().to_string(),
            stock_symbol: None,
            page: 1,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.stock_symbol = Some(symbol.into());
        self
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    /// Trimmed, uppercased symbol, or `None` if blank.
    pub fn symbol(&self) -> Option<String> {
        self.stock_symbol
            .as_deref()
            .map(normalize_symbol)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub index: i64,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    pub header: Vec<String>,
    pub rows: Vec<EnrichedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub trade_date: String,
    pub stock_symbol: Option<String>,
    pub columns: CanonicalColumns,
    pub page: PageView,
    pub lookup: Option<LookupResult>,
    pub aggregate_scope: AggregateScope,
    pub top_by_value: Option<Vec<EnrichedRow>>,
    pub sector_distribution: Option<Vec<CategoryCount>>,
    pub history: Option<PriceHistory>,
    pub export: Option<ExportHandle>,
    pub notices: Vec<String>,
}

/// Runs the pure part of a request: resolve, enrich, page, look up, aggregate.
pub fn build_view(
    snapshot: &RawSnapshot,
    request: &DashboardRequest,
    options: &DashboardOptions,
) -> Result<DashboardView, PipelineError> {
    let columns = resolve_snapshot(snapshot, &options.aliases)?;
    let table = enrich_snapshot(snapshot, &columns);
    let page = paginate(&table.rows, options.page_size, request.page)?;

    let symbol = request.symbol();
    let lookup = symbol
        .as_deref()
        .and_then(|s| lookup_symbol(&table.rows, s));

    let aggregate_rows = match options.scope {
        AggregateScope::CurrentPage => page.rows,
        AggregateScope::FullTable => table.rows.as_slice(),
    };
    let aggregates = compute_aggregates(&columns, aggregate_rows, options.top_n);

    let page_view = PageView {
        index: page.index,
        page_size: page.page_size,
        total_pages: page.total_pages,
        total_rows: page.total_rows,
        header: header_for(&columns),
        rows: page.rows.to_vec(),
    };

    Ok(DashboardView {
        trade_date: request.trade_date.clone(),
        stock_symbol: symbol,
        columns,
        page: page_view,
        lookup,
        aggregate_scope: options.scope,
        top_by_value: aggregates.top_by_value,
        sector_distribution: aggregates.sector_distribution,
        history: None,
        export: None,
        notices: Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardErrorKind {
    /// The snapshot has nothing the pipeline can use.
    InputShape,
    /// A data provider failed.
    Upstream,
    Internal,
}

/// Request-level failure carrying the message shown to the user. The underlying
/// cause, if any, is kept for logging and error reporting only.
#[derive(Debug)]
pub struct DashboardError {
    pub kind: DashboardErrorKind,
    pub message: String,
    pub source: Option<anyhow::Error>,
}

impl DashboardError {
    pub fn upstream(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind: DashboardErrorKind::Upstream,
            message: message.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for DashboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DashboardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_ref()?.as_ref();
        Some(source)
    }
}

impl From<PipelineError> for DashboardError {
    fn from(err: PipelineError) -> Self {
        let kind = match err {
            PipelineError::EmptySnapshot | PipelineError::NoRecognizedColumns { .. } => {
                DashboardErrorKind::InputShape
            }
            PipelineError::InvalidPageSize(_) => DashboardErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
            source: None,
        }
    }
}

/// Fetches the snapshot and runs the pipeline for one request, then writes the page
/// export and fetches price history for a successful lookup. Export and history
/// failures are reported as notices and never fail the request.
pub struct Dashboard {
    snapshots: Arc<dyn SnapshotProvider>,
    history: Option<Arc<dyn PriceHistoryProvider>>,
    exporter: Option<PageExporter>,
    options: DashboardOptions,
}

impl Dashboard {
    pub fn new(snapshots: Arc<dyn SnapshotProvider>, options: DashboardOptions) -> Self {
        Self {
            snapshots,
            history: None,
            exporter: None,
            options,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let snapshots = crate::ingest::provider_from_settings(settings)?;
        let history = crate::history::provider_from_settings(settings)?;
        let options = DashboardOptions::from_env()?;

        let exporter = PageExporter::from_env(settings.export_dir_or_default())?;

        let mut out = Self::new(snapshots, options).with_exporter(exporter);
        out.history = history;
        Ok(out)
    }

    pub fn with_history(mut self, history: Arc<dyn PriceHistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_exporter(mut self, exporter: PageExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn exporter(&self) -> Option<&PageExporter> {
        self.exporter.as_ref()
    }

    pub fn options(&self) -> &DashboardOptions {
        &self.options
    }

    pub async fn run(&self, request: &DashboardRequest) -> Result<DashboardView, DashboardError> {
        let t0 = std::time::Instant::now();
        let trade_date = request.trade_date.as_str();

        let snapshot = self
            .snapshots
            .fetch_snapshot(trade_date)
            .await
            .map_err(|err| {
                tracing::error!(
                    provider = self.snapshots.provider_name(),
                    trade_date,
                    error = %format!("{err:#}"),
                    "snapshot fetch failed"
                );
                DashboardError::upstream(
                    format!("Failed to fetch market data for {trade_date}."),
                    err,
                )
            })?;

        let mut view = build_view(&snapshot, request, &self.options).map_err(|err| {
            tracing::warn!(trade_date, error = %err, "snapshot rejected");
            DashboardError::from(err)
        })?;

        if let Some(exporter) = &self.exporter {
            let exporter = exporter.clone();
            let columns = view.columns.clone();
            let rows = view.page.rows.clone();
            let written = tokio::task::spawn_blocking(move || exporter.write_page(&columns, &rows))
                .await
                .context("join export task failed")
                .and_then(|r| r);
            match written {
                Ok(handle) => view.export = Some(handle),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "page export failed");
                    view.notices
                        .push("Export of the current page is unavailable.".to_string());
                }
            }
        }

        if let (Some(history), Some(lookup)) = (&self.history, &view.lookup) {
            if lookup.is_found() {
                let symbol = lookup.query.clone();
                match history.fetch_history(&symbol).await {
                    Ok(h) => view.history = Some(h),
                    Err(err) => {
                        tracing::warn!(
                            provider = history.provider_name(),
                            %symbol,
                            error = %format!("{err:#}"),
                            "price history fetch failed"
                        );
                        view.notices
                            .push(format!("Price history for {symbol} is unavailable."));
                    }
                }
            }
        }

        tracing::info!(
            trade_date,
            rows = view.page.total_rows,
            page = view.page.index,
            total_pages = view.page.total_pages,
            symbol = view.stock_symbol.as_deref().unwrap_or(""),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "dashboard request served"
        );

        Ok(view)
    }
}
