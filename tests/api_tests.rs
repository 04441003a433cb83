use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use places::api::router;
use places::db::HistoryDB;
use places::AppState;
use tower::ServiceExt;

fn test_state(api_key: Option<&str>) -> AppState {
    let history = HistoryDB::open(":memory:").unwrap();
    AppState::new(Arc::new(history), api_key.map(|s| s.to_string()))
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn req(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

// --- Auth ---

#[tokio::test]
async fn auth_rejects_missing_and_wrong_tokens() {
    let app = router(test_state(Some("secret123")));
    let resp = app.clone().oneshot(req("GET", "/query?q=place:", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = app.oneshot(req("GET", "/query?q=place:", Some("nope"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_accepts_correct_token_and_health_is_public() {
    let app = router(test_state(Some("secret123")));
    let resp = app.clone().oneshot(req("GET", "/query?q=place:", Some("secret123"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app.oneshot(req("GET", "/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["name"], "places");
    assert_eq!(body["schema"], "created");
}

// --- Visits and pages ---

#[tokio::test]
async fn recorded_visits_show_up_in_queries() {
    let state = test_state(None);
    let app = router(state.clone());

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/typed", serde_json::json!({"url": "http://a.test/"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/visits", serde_json::json!({"uri": "http://a.test/", "time": 100})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(body_json(resp).await["visit_id"].is_i64());

    let resp = app
        .clone()
        .oneshot(req("GET", "/places?url=http%3A%2F%2Fa.test%2F", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let place = body_json(resp).await;
    assert_eq!(place["typed"], true);
    assert_eq!(place["visits"][0]["transition"], "typed");

    let resp = app
        .oneshot(req("GET", "/query?q=place%3AbeginTime%3D0%26endTime%3D300%26sort%3D3", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let nodes = body_json(resp).await;
    assert_eq!(nodes.as_array().unwrap().len(), 1);
    assert_eq!(nodes[0]["uri"], "http://a.test/");
    assert_eq!(nodes[0]["node_type"], "uri");
}

#[tokio::test]
async fn redirect_then_visit_records_the_chain() {
    let state = test_state(None);
    let app = router(state.clone());
    let body = serde_json::json!({"source": "http://a.test/", "dest": "http://b.test/", "temporary": true});
    let resp = app.clone().oneshot(json_req("POST", "/redirects", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = app
        .oneshot(json_req("POST", "/visits", serde_json::json!({"uri": "http://b.test/", "time": 500})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(state.history.is_visited("http://a.test/").unwrap());
}

#[tokio::test]
async fn bad_input_maps_to_client_errors() {
    let app = router(test_state(None));
    let resp = app
        .clone()
        .oneshot(json_req("POST", "/visits", serde_json::json!({"uri": "javascript:alert(1)"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].as_str().unwrap().contains("javascript"));

    let resp = app.clone().oneshot(req("GET", "/query?q=place%3Asort%3Dx", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app.oneshot(req("GET", "/places?url=http%3A%2F%2Fnone.test%2F", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn title_update_and_removal() {
    let state = test_state(None);
    state.history.add_uri("http://a.test/", 100, false, true, None).unwrap();
    let app = router(state.clone());

    let body = serde_json::json!({"url": "http://a.test/", "title": "Renamed"});
    let resp = app.clone().oneshot(json_req("PUT", "/places/title", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(state.history.get_page_title("http://a.test/").unwrap().as_deref(), Some("Renamed"));

    let resp = app
        .clone()
        .oneshot(req("DELETE", "/places?url=http%3A%2F%2Fa.test%2F", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["places_removed"], 1);

    state.history.add_uri("http://b.test/", 200, false, true, None).unwrap();
    let resp = app.oneshot(req("DELETE", "/history", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["visits_removed"], 1);
    assert_eq!(state.history.visit_total().unwrap(), 0);
}

#[tokio::test]
async fn maintenance_runs_on_demand() {
    let app = router(test_state(None));
    let resp = app.oneshot(req("POST", "/maintenance", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = body_json(resp).await;
    assert_eq!(report["vacuum"], "first_run");
    assert_eq!(report["expired"]["places_removed"], 0);
}
