use axum::http::StatusCode;
use places::error::PlacesError;

#[test]
fn client_errors_are_bad_requests() {
    for e in [
        PlacesError::InvalidUri("x".into()),
        PlacesError::UriTooLong,
        PlacesError::DisallowedScheme("data".into()),
        PlacesError::QueryParse("sort".into()),
        PlacesError::Validation("bad".into()),
    ] {
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST, "{e}");
    }
    assert_eq!(PlacesError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        PlacesError::Corrupt("x".into()).status_code(),
        StatusCode::INTERNAL_SERVER_ERROR,
    );
}

#[test]
fn error_messages_are_human_readable() {
    assert_eq!(PlacesError::EmptyQueryList.to_string(), "query list must not be empty");
    assert_eq!(
        PlacesError::DisallowedScheme("javascript".into()).to_string(),
        "scheme is not recorded in history: javascript"
    );
    assert!(PlacesError::QueryParse("bad sort".into()).to_string().contains("bad sort"));
}

#[tokio::test]
async fn into_response_has_json_body() {
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    let resp = PlacesError::NotFound.into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "not found");
}
