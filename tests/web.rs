#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use insightedge::app::{AppState, router, router_with_state};
use insightedge::config::Config;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "insightedge-test-boundary";
const SALES: &str = "Date,Product,State,Sales Channel,Payment Method,Total Price
2024-01-01,Widget,NY,Online,Card,100
2024-01-02,Gadget,CA,Store,Cash,250
2024-01-03,Widget,NY,Online,Cash,20
";

fn app() -> Router {
    router(Config::default()).unwrap()
}

fn multipart(file_name: &str, contents: &str) -> Body {
    Body::from(format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = file_name,
        c = contents
    ))
}

fn upload_request(file_name: &str, contents: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(multipart(file_name, contents)).unwrap()
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

/// The `name=value` part of the session cookie a response sets
fn session_cookie(response: &Response) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Upload `SALES` in a fresh session and return its cookie
async fn uploaded(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(upload_request("sales.csv", SALES, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    session_cookie(&response)
}

#[tokio::test]
async fn page_prompts_for_an_upload() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let html = body_text(response).await;
    assert!(html.contains("InsightEdge Sales Dashboard"));
    assert!(html.contains("Please upload a valid JSON, CSV, or Excel file"));
}

#[tokio::test]
async fn dashboard_api_needs_an_upload() {
    let response = app()
        .oneshot(get("/api/dashboard", "session=nobody"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn upload_then_read_the_dashboard() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .clone()
        .oneshot(get("/api/dashboard", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let dashboard = body_json(response).await;
    assert_eq!(dashboard["kpis"]["total_sales"], "370.00");
    assert_eq!(dashboard["kpis"]["total_orders"], "3");
    assert_eq!(dashboard["kpis"]["best_product"], "Gadget");
    assert_eq!(dashboard["charts"].as_array().unwrap().len(), 5);

    let response = app
        .oneshot(get("/api/dashboard?product=Widget&state=NY", &cookie))
        .await
        .unwrap();
    let dashboard = body_json(response).await;
    assert_eq!(dashboard["kpis"]["total_sales"], "120.00");
    assert_eq!(dashboard["kpis"]["top_state"], "NY");
}

#[tokio::test]
async fn deselecting_everything_is_reported() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .oneshot(get("/api/dashboard?filtered=1&state=NY", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "Error loading file: no rows match the current filters"
    );
}

#[tokio::test]
async fn csv_download_holds_the_filtered_rows() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .oneshot(get(
            "/download/filtered_data.csv?start=2024-01-02&end=2024-01-03",
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("filtered_data.csv")
    );
    let csv = body_text(response).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Date,Product,State,Sales Channel,Payment Method,Total Price"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2024-01-02,Gadget"));
}

#[tokio::test]
async fn xlsx_download_is_a_workbook() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .oneshot(get("/download/filtered_data.xlsx", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    // xlsx files are zip archives
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn theme_toggle_is_remembered() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/theme")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = app
        .oneshot(get("/api/dashboard", &cookie))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["theme"], "dark");
}

#[tokio::test]
async fn bad_upload_shows_the_error_and_drops_old_data() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .clone()
        .oneshot(upload_request(
            "sales.csv",
            "Date,Product,State,Total Price\nnot a date,Widget,NY,1\n",
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("Error loading file"));

    let response = app
        .oneshot(get("/api/dashboard", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_chart_is_not_found() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .clone()
        .oneshot(get("/chart/nonsense.png", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get("/chart/sales_by_product.png", &cookie))
        .await
        .unwrap();
    // Rendering needs a system font; without one the error is reported
    assert!(matches!(
        response.status(),
        StatusCode::OK | StatusCode::INTERNAL_SERVER_ERROR
    ));
}

#[tokio::test]
async fn anonymous_visits_do_not_create_sessions() {
    let state = Arc::new(AppState::new(Config::default()).unwrap());
    let app = router_with_state(Arc::clone(&state));

    for i in 0..50 {
        let forged = format!("session=forged-{}", i);
        let response = app.clone().oneshot(get("/", &forged)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(state.sessions().len(), 0);
}

#[tokio::test]
async fn forged_cookie_gets_a_fresh_session() {
    let app = app();
    let response = app
        .oneshot(upload_request("sales.csv", SALES, Some("session=made-up")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("session="));
    assert_ne!(cookie, "session=made-up");
}

#[tokio::test]
async fn full_store_evicts_the_oldest_session() {
    let config = Config {
        max_sessions: 2,
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config).unwrap());
    let app = router_with_state(Arc::clone(&state));

    let first = uploaded(&app).await;
    let second = uploaded(&app).await;
    let third = uploaded(&app).await;
    assert_eq!(state.sessions().len(), 2);

    let response = app.clone().oneshot(get("/api/dashboard", &first)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    for cookie in [second, third] {
        let response = app.clone().oneshot(get("/api/dashboard", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn unreadable_dates_are_rejected() {
    let app = app();
    let cookie = uploaded(&app).await;

    let response = app
        .clone()
        .oneshot(get("/api/dashboard?start=yesterday", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "invalid start date `yesterday`"
    );

    let response = app
        .oneshot(get("/?end=soon", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("invalid end date"));
}
