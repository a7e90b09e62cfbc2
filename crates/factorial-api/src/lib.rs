//! HTTP front end: thin DTO translation over the persistence layer, the
//! artifact store, the cache tier, and the queue producer.
//!
//! Every response is the same wrapped envelope
//! (`factorial_types::ApiResponse`); `calculating` is a legitimate success
//! state, not an error.

use actix_web::{web, HttpResponse};
use factorial_cache::Cache;
use factorial_db::{CalculationRepository, Persistence};
use factorial_queue::Producer;
use factorial_storage::ArtifactStore;
use factorial_types::{
    validate_number, ApiResponse, CalculateRequest, CalculateResponseData, CalculationStatus,
    ErrorData, MetadataResponseData, ResultResponseData, ValidationError,
};
use std::sync::Arc;

pub struct AppState {
    pub db: Arc<Persistence>,
    pub store: Arc<dyn ArtifactStore>,
    pub cache: Arc<dyn Cache>,
    pub producer: Arc<dyn Producer>,
    pub max_factorial: u64,
}

/// Registers every route under `/api/v1` plus the unversioned health probes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/factorial", web::post().to(post_factorial))
            .route("/factorial/metadata/{number}", web::get().to(get_metadata))
            .route("/factorial/{number}", web::get().to(get_factorial)),
    )
    .route("/health", web::get().to(health))
    .route("/ready", web::get().to(ready));
}

fn bad_request(err: ValidationError) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<ErrorData>::fail(400, err.to_string()))
}

/// Reads `number`'s decimal body through the cache, falling back to the
/// artifact store. Mirrors the pipeline's own read-through order (§4.4).
async fn read_body(
    state: &AppState,
    number: u64,
    artifact_key: &str,
) -> Result<String, factorial_storage::StorageError> {
    if state.cache.should_cache(number) {
        if let Ok(body) = state.cache.get(number).await {
            if !body.is_empty() {
                return Ok(body);
            }
        }
    }
    state.store.get(artifact_key).await
}

async fn post_factorial(
    state: web::Data<AppState>,
    body: web::Json<CalculateRequest>,
) -> HttpResponse {
    let number = match validate_number(&body.number, state.max_factorial) {
        Ok(n) => n,
        Err(e) => return bad_request(e),
    };

    match state.db.find(number).await {
        Ok(Some(record)) if record.status == CalculationStatus::Done => {
            match read_body(&state, number, &record.artifact_key).await {
                Ok(factorial_result) => HttpResponse::Ok().json(ApiResponse::ok(
                    200,
                    "done",
                    ResultResponseData {
                        number: number.to_string(),
                        factorial_result,
                    },
                )),
                Err(e) => {
                    log::error!("failed to read artifact for done number {number}: {e}");
                    HttpResponse::InternalServerError()
                        .json(ApiResponse::<ErrorData>::fail(500, "failed to read stored result"))
                }
            }
        }
        Ok(_) => publish_and_calculating(&state, number).await,
        Err(e) => {
            log::error!("db lookup failed for {number}: {e}");
            HttpResponse::InternalServerError()
                .json(ApiResponse::<ErrorData>::fail(500, "database error"))
        }
    }
}

async fn get_factorial(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let number = match validate_number(&path, state.max_factorial) {
        Ok(n) => n,
        Err(e) => return bad_request(e),
    };

    match state.db.find(number).await {
        Ok(Some(record)) if record.status == CalculationStatus::Done => {
            match read_body(&state, number, &record.artifact_key).await {
                Ok(factorial_result) => HttpResponse::Ok().json(ApiResponse::ok(
                    200,
                    "done",
                    ResultResponseData {
                        number: number.to_string(),
                        factorial_result,
                    },
                )),
                Err(e) => {
                    log::error!("failed to read artifact for done number {number}: {e}");
                    HttpResponse::InternalServerError()
                        .json(ApiResponse::<ErrorData>::fail(500, "failed to read stored result"))
                }
            }
        }
        Ok(Some(_)) => calculating_response(number),
        Ok(None) => publish_and_calculating(&state, number).await,
        Err(e) => {
            log::error!("db lookup failed for {number}: {e}");
            HttpResponse::InternalServerError()
                .json(ApiResponse::<ErrorData>::fail(500, "database error"))
        }
    }
}

fn calculating_response(number: u64) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(
        200,
        "calculating",
        CalculateResponseData {
            number: Some(number.to_string()),
        },
    ))
}

/// Publishes a kick message for `number` (POST path: original request; GET
/// path: a miss that re-drives the pipeline) and replies `calculating`.
async fn publish_and_calculating(state: &AppState, number: u64) -> HttpResponse {
    match state.producer.publish(number).await {
        Ok(()) => calculating_response(number),
        Err(e) => {
            log::error!("failed to publish factorial request for {number}: {e}");
            HttpResponse::InternalServerError()
                .json(ApiResponse::<ErrorData>::fail(500, "failed to queue request"))
        }
    }
}

async fn get_metadata(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let number = match validate_number(&path, state.max_factorial) {
        Ok(n) => n,
        Err(e) => return bad_request(e),
    };

    match state.db.find(number).await {
        Ok(Some(record)) => {
            HttpResponse::Ok().json(ApiResponse::ok(200, "ok", MetadataResponseData::from(&record)))
        }
        Ok(None) => calculating_response(number),
        Err(e) => {
            log::error!("metadata lookup failed for {number}: {e}");
            HttpResponse::InternalServerError()
                .json(ApiResponse::<ErrorData>::fail(500, "database error"))
        }
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(200, "ok", ()))
}

async fn ready(state: web::Data<AppState>) -> HttpResponse {
    match state.db.ping().await {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::ok(200, "ready", ())),
        Err(e) => {
            log::warn!("readiness probe failed: {e}");
            HttpResponse::ServiceUnavailable().json(ApiResponse::<ErrorData>::fail(503, "database unreachable"))
        }
    }
}

#[derive(utoipa::OpenApi)]
#[openapi(paths(), components(schemas(
    factorial_types::CalculateRequest,
    factorial_types::CalculateResponseData,
    factorial_types::ResultResponseData,
    factorial_types::MetadataResponseData,
    factorial_types::ErrorData,
)))]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use factorial_queue::QueueError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProducer {
        published: Mutex<Vec<u64>>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn publish(&self, number: u64) -> Result<(), QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.published.lock().unwrap().push(number);
            Ok(())
        }
    }

    struct DummyStore;

    #[async_trait]
    impl ArtifactStore for DummyStore {
        async fn put(&self, _n: u64, _body: &str) -> Result<String, factorial_storage::StorageError> {
            unreachable!()
        }
        async fn get(&self, _key: &str) -> Result<String, factorial_storage::StorageError> {
            unreachable!()
        }
    }

    struct DummyCache;

    #[async_trait]
    impl Cache for DummyCache {
        fn should_cache(&self, _n: u64) -> bool {
            false
        }
        async fn get(&self, _n: u64) -> Result<String, factorial_cache::CacheError> {
            Ok(String::new())
        }
        async fn set(&self, _n: u64, _body: &str) {}
    }

    #[actix_web::test]
    async fn validation_error_maps_to_400() {
        let err = validate_number("-1", 100).unwrap_err();
        let resp = bad_request(err);
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    /// A pool that never connects; safe to hold as long as the test never
    /// drives a request past the `max_factorial` bounds check.
    fn unreachable_pool() -> deadpool_postgres::Pool {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some("127.0.0.1".to_string());
        cfg.port = Some(1);
        cfg.dbname = Some("unused".to_string());
        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls).unwrap()
    }

    #[actix_web::test]
    async fn post_rejects_above_max_factorial() {
        let producer = Arc::new(RecordingProducer::default());
        let state = web::Data::new(AppState {
            db: Arc::new(Persistence::new(unreachable_pool())),
            store: Arc::new(DummyStore),
            cache: Arc::new(DummyCache),
            producer,
            max_factorial: 10,
        });
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/factorial")
            .set_json(serde_json::json!({ "number": "11" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
