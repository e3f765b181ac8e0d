use std::path::PathBuf;

use axum::{
    Extension, Json, Router,
    extract::{Path, Request, rejection::JsonRejection},
    handler::HandlerWithoutStateExt,
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
    routing::{get, get_service},
};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::{
    error::AppError,
    models::{IngestParams, IotReading, MessageResponse, ShortUrl, URLParams},
    readings::ReadingService,
    shortener::UrlShortener,
};

/// Files served from disk: the `public/` tree and the access log.
#[derive(Clone)]
pub struct Assets {
    pub public_dir: PathBuf,
    pub access_log: PathBuf,
}

impl Assets {
    fn view(&self, name: &str) -> PathBuf {
        self.public_dir.join("views").join(name)
    }
}

async fn ingest_route(
    readings: Extension<ReadingService>,
    payload: Result<Json<IngestParams>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(params) = payload.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    readings.ingest(params.values).await?;

    Ok(Json(MessageResponse {
        message: "Data saved",
    }))
}

async fn list_readings_route(
    readings: Extension<ReadingService>,
) -> Result<Json<Vec<IotReading>>, AppError> {
    Ok(Json(readings.list_all().await?))
}

async fn list_range_route(
    readings: Extension<ReadingService>,
    range: Path<String>,
) -> Result<Json<Vec<IotReading>>, AppError> {
    Ok(Json(readings.list_range(&range.0).await?))
}

async fn latest_reading_route(
    readings: Extension<ReadingService>,
) -> Result<Json<Option<IotReading>>, AppError> {
    Ok(Json(readings.latest().await?))
}

async fn shorten_url_route(
    shortener: Extension<UrlShortener>,
    payload: Result<Json<URLParams>, JsonRejection>,
) -> Result<Json<ShortUrl>, AppError> {
    let Ok(Json(params)) = payload else {
        return Err(AppError::MalformedURL);
    };
    tracing::debug!(url = %params.url, "shorten request");

    Ok(Json(shortener.shorten(&params.url).await?))
}

async fn resolve_url_route(
    shortener: Extension<UrlShortener>,
    path: Path<String>,
) -> Result<Response, AppError> {
    let url = shortener.resolve(&path.0).await?;

    Ok((StatusCode::FOUND, [(LOCATION, url.original_url)]).into_response())
}

fn is_acme_token(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

async fn acme_challenge_route(
    assets: Extension<Assets>,
    path: Path<String>,
    request: Request,
) -> Response {
    if !is_acme_token(&path.0) {
        return AppError::PageNotFound.into_response();
    }
    let file = assets
        .public_dir
        .join(".well-known")
        .join("acme-challenge")
        .join(&path.0);
    match ServeFile::new(file).oneshot(request).await {
        Ok(response) if response.status() == StatusCode::NOT_FOUND => {
            AppError::PageNotFound.into_response()
        }
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

async fn page_not_found() -> AppError {
    AppError::PageNotFound
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[must_use]
pub fn router(shortener: UrlShortener, readings: ReadingService, assets: &Assets) -> Router {
    let public = ServeDir::new(&assets.public_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(page_not_found.into_service());

    Router::new()
        .route(
            "/",
            get_service(ServeFile::new(assets.view("index.html"))).post(ingest_route),
        )
        .route("/iot", get_service(ServeFile::new(assets.view("iot.html"))))
        .route("/iot/list", get(list_readings_route))
        .route("/iot/list/{range}", get(list_range_route))
        .route("/iot/last", get(latest_reading_route))
        .route(
            "/url",
            get_service(ServeFile::new(assets.view("url.html"))).post(shorten_url_route),
        )
        .route("/url/{id}", get(resolve_url_route))
        .route("/.well-known/acme-challenge/{id}", get(acme_challenge_route))
        .route("/ip_logs", get_service(ServeFile::new(&assets.access_log)))
        .route(
            "/favicon.ico",
            get_service(ServeFile::new(
                assets.public_dir.join("images").join("favicon.png"),
            )),
        )
        .method_not_allowed_fallback(method_not_allowed)
        .fallback_service(public)
        .layer(Extension(shortener))
        .layer(Extension(readings))
        .layer(Extension(assets.clone()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, body::to_bytes, http::Request};
    use serde_json::{Value, json};

    use super::*;
    use crate::{repository::memory::MemoryStore, shortener::tests::StaticResolver};

    struct TestApp {
        app: Router,
        store: Arc<MemoryStore>,
        _public: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let public = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(public.path().join("views")).unwrap();
        std::fs::write(public.path().join("views/index.html"), "<h1>index</h1>").unwrap();
        std::fs::create_dir_all(public.path().join(".well-known/acme-challenge")).unwrap();
        std::fs::write(
            public.path().join(".well-known/acme-challenge/tok-EN_1"),
            "tok-EN_1.key",
        )
        .unwrap();
        std::fs::create_dir_all(public.path().join("js")).unwrap();
        std::fs::write(public.path().join("js/iot.js"), "// chart").unwrap();
        let access_log = public.path().join("access.log");
        std::fs::write(&access_log, "10.0.0.1 - - [..] \"GET / HTTP/1.1\" 200 - \"-\" \"-\"\n")
            .unwrap();

        let store = Arc::new(MemoryStore::default());
        let shortener = UrlShortener::new(
            store.clone(),
            Arc::new(StaticResolver::new(&["example.com"])),
        );
        let readings = ReadingService::new(store.clone());
        let assets = Assets {
            public_dir: public.path().to_path_buf(),
            access_log,
        };

        TestApp {
            app: router(shortener, readings, &assets),
            store,
            _public: public,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Response) {
        let response = app.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn ingested_reading_is_latest() {
        let test = test_app();

        let body = json!({ "values": { "temp": 21.5, "hum": 40, "pressure": 1013 } });
        let (status, response) = send(&test.app, post_json("/", &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "message": "Data saved" }));

        let (status, response) = send(&test.app, get("/iot/last")).await;
        assert_eq!(status, StatusCode::OK);
        let latest = body_json(response).await;
        assert_eq!(
            latest["values"],
            json!({ "temperature": 21.5, "humidity": 40.0, "pressure": 1013.0 })
        );
        assert!(latest["timestamp"].is_string());
    }

    #[tokio::test]
    async fn client_timestamp_is_ignored() {
        let test = test_app();
        let before = chrono::Utc::now().timestamp_millis();

        let body = json!({
            "timestamp": 0,
            "values": { "temp": 20, "hum": 50, "pressure": 1000 }
        });
        send(&test.app, post_json("/", &body)).await;

        let (_, response) = send(&test.app, get("/iot/last")).await;
        let reading: IotReading = serde_json::from_value(body_json(response).await).unwrap();
        assert!(reading.timestamp.timestamp_millis() >= before);
    }

    #[tokio::test]
    async fn latest_is_null_without_readings() {
        let test = test_app();

        let (status, response) = send(&test.app, get("/iot/last")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(response).await, Value::Null);
    }

    #[tokio::test]
    async fn incomplete_reading_is_rejected() {
        let test = test_app();

        let body = json!({ "values": { "temp": 21.5, "pressure": 1013 } });
        let (status, response) = send(&test.app, post_json("/", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "values.hum is required" })
        );

        let (status, response) = send(&test.app, post_json("/", &json!({ "values": { "temp": true } }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let (_, response) = send(&test.app, get("/iot/list")).await;
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn range_listing_is_inclusive() {
        let test = test_app();
        let body = json!({ "values": { "temp": 1, "hum": 2, "pressure": 3 } });
        send(&test.app, post_json("/", &body)).await;

        let (_, response) = send(&test.app, get("/iot/last")).await;
        let reading: IotReading = serde_json::from_value(body_json(response).await).unwrap();
        let millis = reading.timestamp.timestamp_millis();

        let uri = format!("/iot/list/{millis}-{millis}");
        let (status, response) = send(&test.app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let uri = format!("/iot/list/0-{}", millis - 1);
        let (_, response) = send(&test.app, get(&uri)).await;
        assert_eq!(body_json(response).await, json!([]));

        let (_, response) = send(&test.app, get("/iot/list")).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_range_is_rejected() {
        let test = test_app();

        let (status, response) = send(&test.app, get("/iot/list/yesterday-today")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn shorten_then_redirect() {
        let test = test_app();
        let body = json!({ "url": "https://example.com/a" });

        let (status, response) = send(&test.app, post_json("/url", &body)).await;
        assert_eq!(status, StatusCode::OK);
        let first = body_json(response).await;
        let (_, response) = send(&test.app, post_json("/url", &body)).await;
        let second = body_json(response).await;

        assert_eq!(first, second);
        assert_eq!(first["original_url"], "https://example.com/a");
        assert_eq!(test.store.url_count(), 1);

        let short = first["short_url"].as_str().unwrap();
        let (status, response) = send(&test.app, get(&format!("/url/{short}"))).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://example.com/a"
        );
    }

    #[tokio::test]
    async fn control_characters_still_redirect() {
        let test = test_app();
        let body = json!({ "url": "https://example.com/a\u{1}b" });

        let (status, response) = send(&test.app, post_json("/url", &body)).await;
        assert_eq!(status, StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["original_url"], "https://example.com/a%01b");

        let short = created["short_url"].as_str().unwrap();
        let (status, response) = send(&test.app, get(&format!("/url/{short}"))).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "https://example.com/a%01b"
        );
    }

    #[tokio::test]
    async fn shorten_rejects_invalid_url() {
        let test = test_app();

        let (status, response) =
            send(&test.app, post_json("/url", &json!({ "url": "not a url" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({ "error": "Invalid URL" }));

        let (status, response) = send(&test.app, post_json("/url", &json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({ "error": "Invalid URL" }));

        let (status, response) = send(
            &test.app,
            post_json("/url", &json!({ "url": "https://unknown.invalid/" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "DNS lookup failed" })
        );

        assert_eq!(test.store.url_count(), 0);
    }

    #[tokio::test]
    async fn unknown_short_url_is_json_error() {
        let test = test_app();

        let (status, response) = send(&test.app, get("/url/doesnotexist")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "Invalid URL" }));
    }

    #[tokio::test]
    async fn unknown_page_is_json_404() {
        let test = test_app();

        let (status, response) = send(&test.app, get("/nothing/here")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "Page not found" }));
    }

    #[tokio::test]
    async fn wrong_methods_get_json_errors() {
        let test = test_app();

        let request = Request::delete("/iot/last").body(Body::empty()).unwrap();
        let (status, response) = send(&test.app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Method not allowed" })
        );

        let (status, response) = send(&test.app, post_json("/js/iot.js", &json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "Page not found" }));
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let test = test_app();

        let (status, response) = send(&test.app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "<h1>index</h1>");

        let (status, response) = send(&test.app, get("/js/iot.js")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "// chart");

        let (status, response) = send(&test.app, get("/ip_logs")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_text(response).await.starts_with("10.0.0.1 - - "));
    }

    #[tokio::test]
    async fn acme_challenge_files() {
        let test = test_app();

        let (status, response) =
            send(&test.app, get("/.well-known/acme-challenge/tok-EN_1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(response).await, "tok-EN_1.key");

        let (status, response) = send(&test.app, get("/.well-known/acme-challenge/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "Page not found" }));

        let (status, _) = send(&test.app, get("/.well-known/acme-challenge/..%2Faccess.log")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn acme_tokens_are_base64url() {
        assert!(is_acme_token("tok-EN_1"));
        assert!(!is_acme_token(""));
        assert!(!is_acme_token(".."));
        assert!(!is_acme_token("a/b"));
    }
}
