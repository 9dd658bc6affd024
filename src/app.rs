#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::Query;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::NaiveDate;
use handlebars::Handlebars;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::dashboard::{DashboardState, error_message};
use crate::dates::parse_date_str;
use crate::downloader::{chart_png_base64, export_chart_image, export_xlsx};
use crate::error::DashboardError;
use crate::filter::FilterSelection;
use crate::graph::{GraphOptions, SALES_BY_PRODUCT};
use crate::session::{SessionStore, SharedSession, Theme, lock_session};

const SESSION_COOKIE: &str = "session";
const NO_UPLOAD: &str = "Please upload a valid JSON, CSV, or Excel file to get started.";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state: sessions, templates and settings
pub struct AppState {
    sessions: SessionStore,
    templates: Handlebars<'static>,
    config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let mut templates = Handlebars::new();
        templates.register_template_string("dashboard", include_str!("./static/dashboard.hbs"))?;
        Ok(AppState {
            sessions: SessionStore::new(config.session_ttl(), config.max_sessions),
            templates,
            config,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

/// Filter parameters as they arrive in a query string
///
/// `product` and `state` repeat once per selected value. Without `filtered`
/// a missing list means "everything"; with it, a missing list is empty.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    start: Option<String>,
    end: Option<String>,
    #[serde(default)]
    product: Vec<String>,
    #[serde(default)]
    state: Vec<String>,
    filtered: Option<String>,
}

impl DashboardQuery {
    /// Turn the raw parameters into a filter selection
    ///
    /// # Returns
    /// * `Result<FilterSelection, String>` - The selection, or a message
    ///   naming the date parameter that could not be read. Blank dates are
    ///   simply absent.
    pub fn selection(self) -> Result<FilterSelection, String> {
        let explicit = self.filtered.is_some();
        let list = |values: Vec<String>| (explicit || !values.is_empty()).then_some(values);
        Ok(FilterSelection {
            start: query_date("start", self.start.as_deref())?,
            end: query_date("end", self.end.as_deref())?,
            products: list(self.product),
            states: list(self.state),
        })
    }
}

fn query_date(name: &str, value: Option<&str>) -> Result<Option<NaiveDate>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_date_str(text)
            .map(Some)
            .ok_or_else(|| format!("invalid {} date `{}`", name, text)),
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    message: String,
}

/// Why a data endpoint could not answer
enum ApiError {
    BadRequest(String),
    NoUpload,
    NotFound(String),
    Internal(String),
    Dashboard(DashboardError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NoUpload => (StatusCode::NOT_FOUND, NO_UPLOAD.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ApiError::Dashboard(e @ (DashboardError::Render(_) | DashboardError::Export(_))) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Dashboard(e) => (StatusCode::UNPROCESSABLE_ENTITY, error_message(&e)),
        };
        let body = ErrorResponse {
            status: "error".to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<DashboardError> for ApiError {
    fn from(e: DashboardError) -> Self {
        ApiError::Dashboard(e)
    }
}

/// Build the router with all dashboard routes
///
/// # Arguments
/// * `config` - Server settings; chart size, upload limit and session limits
///   are taken from here
///
/// # Returns
/// * `Result<Router, Box<dyn std::error::Error>>` - The router, or the error
///   from compiling the page template
pub fn router(config: Config) -> Result<Router, Box<dyn std::error::Error>> {
    Ok(router_with_state(Arc::new(AppState::new(config)?)))
}

/// Build the router around an existing state
pub fn router_with_state(app_state: Arc<AppState>) -> Router {
    let body_limit = app_state.config.max_upload_bytes();

    Router::new()
        .route("/", get(serve_dashboard))
        .route("/upload", post(upload_file))
        .route("/theme", post(toggle_theme))
        .route("/api/dashboard", get(get_dashboard))
        .route("/download/filtered_data.csv", get(download_csv))
        .route("/download/filtered_data.xlsx", get(download_xlsx))
        .route("/chart/:id", get(get_chart))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();
    let app_state = Arc::new(AppState::new(config)?);

    // Expired sessions are also dropped whenever a new one starts
    let sweeper = Arc::clone(&app_state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let removed = sweeper.sessions.sweep();
            if removed > 0 {
                debug!("swept {} expired sessions", removed);
            }
        }
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router_with_state(app_state)).await?;

    Ok(())
}

// The live session named by the cookie; never creates one
fn existing_session(state: &AppState, jar: &CookieJar) -> Option<SharedSession> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.get(cookie.value()))
}

// The caller's session, starting a new one (and setting its cookie) when the
// cookie is missing, forged or expired
fn claim_session(state: &AppState, jar: CookieJar) -> (CookieJar, SharedSession) {
    if let Some(session) = existing_session(state, &jar) {
        return (jar, session);
    }
    let id = Uuid::new_v4().to_string();
    let session = state.sessions.insert(id.clone());
    let mut cookie = Cookie::new(SESSION_COOKIE, id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    (jar.add(cookie), session)
}

/// Run CPU-bound work (decoding, rendering, rasterizing) off the async workers
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!("blocking task failed: {}", e);
        ApiError::Internal(e.to_string())
    })
}

/// Render the caller's dashboard and hand it to `then`, all on a blocking
/// thread; the session is only locked while the dashboard is rendered
async fn with_dashboard<T, F>(
    state: &AppState,
    jar: &CookieJar,
    query: DashboardQuery,
    then: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(DashboardState, GraphOptions) -> Result<T, ApiError> + Send + 'static,
{
    let selection = query.selection().map_err(ApiError::BadRequest)?;
    let session = existing_session(state, jar).ok_or(ApiError::NoUpload)?;
    let options = state.config.graph_options();

    blocking(move || {
        let rendered = lock_session(&session).render(&selection, &options);
        let dashboard = rendered.ok_or(ApiError::NoUpload)??;
        let options = GraphOptions {
            theme: dashboard.theme,
            ..options
        };
        then(dashboard, options)
    })
    .await?
}

async fn serve_dashboard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let session = existing_session(&state, &jar);
    match query.selection() {
        Ok(selection) => render_page(state, session, selection, None).await.into_response(),
        Err(message) => {
            let page = render_page(state, session, FilterSelection::default(), Some(message)).await;
            (StatusCode::BAD_REQUEST, page).into_response()
        }
    }
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((file_name, bytes)),
                    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    let Some((file_name, bytes)) = upload else {
        return (StatusCode::BAD_REQUEST, "No file data received").into_response();
    };

    let (jar, session) = claim_session(&state, jar);
    let target = Arc::clone(&session);
    let loaded = blocking(move || {
        lock_session(&target)
            .set_upload(&file_name, &bytes)
            .map(|_| ())
    })
    .await;

    match loaded {
        Ok(Ok(())) => (jar, Redirect::to("/")).into_response(),
        Ok(Err(e)) => {
            let page = render_page(
                state,
                Some(session),
                FilterSelection::default(),
                Some(error_message(&e)),
            )
            .await;
            (jar, (StatusCode::UNPROCESSABLE_ENTITY, page)).into_response()
        }
        Err(e) => (jar, e).into_response(),
    }
}

async fn toggle_theme(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (jar, session) = claim_session(&state, jar);
    let theme = lock_session(&session).toggle_theme();
    info!("switched to {:?} theme", theme);
    (jar, Redirect::to("/")).into_response()
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<DashboardQuery>,
) -> Response {
    match with_dashboard(&state, &jar, query, |dashboard, _| Ok(dashboard)).await {
        Ok(dashboard) => Json(dashboard).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn download_csv(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let csv = with_dashboard(&state, &jar, query, |dashboard, _| {
        dashboard.csv.ok_or_else(|| {
            ApiError::Dashboard(DashboardError::Export("csv export failed".to_string()))
        })
    })
    .await;
    match csv {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"filtered_data.csv\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn download_xlsx(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let xlsx = with_dashboard(&state, &jar, query, |dashboard, _| {
        export_xlsx(&dashboard.filtered).map_err(ApiError::from)
    })
    .await;
    match xlsx {
        Ok(bytes) => (
            [
                (
                    header::CONTENT_TYPE,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"filtered_data.xlsx\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_chart(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(chart_id): Path<String>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    let chart_id = chart_id.trim_end_matches(".png").to_string();
    let png = with_dashboard(&state, &jar, query, move |dashboard, options| {
        let chart = dashboard
            .chart(&chart_id)
            .ok_or_else(|| ApiError::NotFound(format!("chart `{}`", chart_id)))?;
        export_chart_image(chart, &options).map_err(ApiError::from)
    })
    .await;
    match png {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Render the HTML page for a session, or the empty page for none
///
/// When `error` is set it is shown instead of the dashboard.
async fn render_page(
    state: Arc<AppState>,
    session: Option<SharedSession>,
    selection: FilterSelection,
    error: Option<String>,
) -> (StatusCode, Html<String>) {
    let page_state = Arc::clone(&state);
    let html = blocking(move || {
        let options = page_state.config.graph_options();
        let (theme, file_name, rendered) = match &session {
            Some(session) => {
                let session = lock_session(session);
                let rendered = match error {
                    None => session.render(&selection, &options),
                    Some(_) => None,
                };
                (
                    session.theme(),
                    session.upload().map(|u| u.file_name.clone()),
                    rendered,
                )
            }
            None => (Theme::default(), None, None),
        };

        let mut context = json!({
            "theme": theme,
            "dark": theme == Theme::Dark,
            "file_name": file_name,
        });
        match (error, rendered) {
            (Some(message), _) => context["error"] = json!(message),
            (None, None) => context["info"] = json!(NO_UPLOAD),
            (None, Some(Err(e))) => context["error"] = json!(error_message(&e)),
            (None, Some(Ok(dashboard))) => {
                context["dashboard"] = page_context(&dashboard, &options)
            }
        }
        page_state
            .templates
            .render("dashboard", &context)
            .map_err(|e| e.to_string())
    })
    .await;

    match html {
        Ok(Ok(html)) => (StatusCode::OK, Html(html)),
        Ok(Err(message)) | Err(ApiError::Internal(message)) => {
            error!("page rendering failed: {}", message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("<p>Could not render page: {}</p>", message)),
            )
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<p>Could not render page</p>".to_string()),
        ),
    }
}

fn page_context(dashboard: &DashboardState, options: &GraphOptions) -> serde_json::Value {
    let options = GraphOptions {
        theme: dashboard.theme,
        ..options.clone()
    };
    let charts: Vec<_> = dashboard
        .charts
        .iter()
        .map(|chart| {
            // the product chart was already rasterized by the render
            let png = if chart.id == SALES_BY_PRODUCT {
                dashboard.product_chart_png.clone()
            } else {
                chart_png_base64(chart, &options).ok()
            };
            json!({
                "id": chart.id,
                "title": chart.title,
                "png": png,
            })
        })
        .collect();

    let choices = |all: &[String], chosen: &BTreeSet<String>| {
        all.iter()
            .map(|v| json!({ "name": v, "checked": chosen.contains(v) }))
            .collect::<Vec<_>>()
    };

    let preview: Vec<Vec<String>> = dashboard
        .filtered
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();

    json!({
        "kpis": dashboard.kpis,
        "charts": charts,
        "product_chart_png": dashboard.product_chart_png,
        "export_errors": dashboard.export_errors,
        "min_date": dashboard.options.min_date,
        "max_date": dashboard.options.max_date,
        "start": dashboard.filters.start,
        "end": dashboard.filters.end,
        "products": choices(&dashboard.options.products[..], &dashboard.filters.products),
        "states": choices(&dashboard.options.states[..], &dashboard.filters.states),
        "selected_products": dashboard.filters.products,
        "selected_states": dashboard.filters.states,
        "columns": dashboard.filtered.columns,
        "rows": preview,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(start: Option<&str>, end: Option<&str>) -> DashboardQuery {
        DashboardQuery {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            ..DashboardQuery::default()
        }
    }

    #[test]
    fn blank_dates_are_absent() {
        let selection = query(Some(""), None).selection().unwrap();
        assert_eq!(selection, FilterSelection::default());
    }

    #[test]
    fn unreadable_dates_are_rejected() {
        let err = query(Some("2024-01-01"), Some("next week"))
            .selection()
            .unwrap_err();
        assert_eq!(err, "invalid end date `next week`");
    }

    #[test]
    fn explicit_marker_turns_missing_lists_empty() {
        let selection = DashboardQuery {
            filtered: Some("1".into()),
            state: vec!["NY".into()],
            ..DashboardQuery::default()
        }
        .selection()
        .unwrap();
        assert_eq!(selection.products, Some(Vec::new()));
        assert_eq!(selection.states, Some(vec!["NY".to_string()]));
        assert!(DashboardQuery::default().selection().unwrap().products.is_none());
    }
}
