use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use bhavdesk_core::dashboard::{
    Dashboard, DashboardError, DashboardErrorKind, DashboardRequest, DashboardView,
};
use bhavdesk_core::export::{ExportMode, PageExporter, SHARED_EXPORT_FILE};
use bhavdesk_core::time::nse_market;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = bhavdesk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let dashboard = Dashboard::from_settings(&settings).inspect_err(|e| {
        sentry_anyhow::capture_anyhow(e);
        tracing::error!(error = %format!("{e:#}"), "failed to configure dashboard");
    })?;

    if let Some(exporter) = dashboard.exporter() {
        tracing::info!(
            dir = %exporter.dir().display(),
            mode = ?exporter.mode(),
            "page exports enabled"
        );
    }

    let state = AppState {
        dashboard: Arc::new(dashboard),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/dashboard", get(get_dashboard).post(post_dashboard))
        .route("/download", get(download_latest))
        .route("/exports/:id", get(download_export))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    dashboard: Arc<Dashboard>,
}

/// Raw form/query fields; everything is optional text so bad input gets our own message.
#[derive(Debug, Default, Deserialize)]
struct DashboardParams {
    trade_date: Option<String>,
    stock_symbol: Option<String>,
    page: Option<String>,
}

impl DashboardParams {
    fn into_request(self) -> Result<DashboardRequest, ApiError> {
        let trade_date = match self.trade_date.filter(|s| !s.trim().is_empty()) {
            Some(s) => s,
            None => nse_market::resolve_trade_date(None, chrono::Utc::now())
                .map(nse_market::format_trade_date)
                .map_err(|e| ApiError::internal(&e))?,
        };

        let page = match self.page.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("Page must be a whole number."))?,
            None => 1,
        };

        let mut req = DashboardRequest::new(trade_date).with_page(page);
        if let Some(symbol) = self.stock_symbol {
            req = req.with_symbol(symbol);
        }
        Ok(req)
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal error.".to_string(),
        }
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        let status = match err.kind {
            DashboardErrorKind::InputShape => StatusCode::UNPROCESSABLE_ENTITY,
            DashboardErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            DashboardErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.kind != DashboardErrorKind::InputShape {
            if let Some(source) = &err.source {
                sentry_anyhow::capture_anyhow(source);
            }
        }
        Self {
            status,
            message: err.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

async fn get_dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<DashboardView>, ApiError> {
    serve_dashboard(&state, params).await
}

async fn post_dashboard(
    State(state): State<AppState>,
    Form(params): Form<DashboardParams>,
) -> Result<Json<DashboardView>, ApiError> {
    serve_dashboard(&state, params).await
}

async fn serve_dashboard(
    state: &AppState,
    params: DashboardParams,
) -> Result<Json<DashboardView>, ApiError> {
    let req = params.into_request()?;
    let view = state.dashboard.run(&req).await?;
    Ok(Json(view))
}

async fn download_latest(State(state): State<AppState>) -> Result<Response, ApiError> {
    let exporter = shared_exporter(&state)?;
    csv_attachment(exporter.shared_path(), SHARED_EXPORT_FILE.to_string()).await
}

async fn download_export(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let exporter = state
        .dashboard
        .exporter()
        .filter(|e| e.mode() == ExportMode::PerRequest)
        .ok_or_else(|| ApiError::not_found("Export not found."))?;
    csv_attachment(exporter.path_for(id), PageExporter::file_name_for(id)).await
}

fn shared_exporter(state: &AppState) -> Result<&PageExporter, ApiError> {
    state
        .dashboard
        .exporter()
        .filter(|e| e.mode() == ExportMode::Shared)
        .ok_or_else(|| ApiError::not_found("No shared export is configured."))
}

async fn csv_attachment(
    path: std::path::PathBuf,
    file_name: String,
) -> Result<Response, ApiError> {
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Export not found."));
        }
        Err(e) => {
            let err = anyhow::Error::new(e).context(format!("failed to read {}", path.display()));
            return Err(ApiError::internal(&err));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
