//! HTTP surface of the secret store.
//!
//! `POST /secrets` stores a ciphertext, `POST /secrets/{id}/consume` hands it
//! out once. No GET route reads a stored secret.

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::web::{self, Data, Json, Path};
use actix_web::{HttpRequest, HttpResponse};
use ember_shared::{CreateSecretRequest, ErrorBody, HealthResponse, NOT_FOUND_MESSAGE, SecretId};
use log::{error, info};

use crate::errors::ServerError;
use crate::store::SecretStore;

/// Room for the JSON envelope around the ciphertext.
const ENVELOPE_OVERHEAD: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_size: usize,
}

impl Limits {
    fn check(&self, payload: &str) -> Result<(), ServerError> {
        if payload.is_empty() {
            return Err(ServerError::EmptyPayload);
        }
        if payload.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge(self.max_size));
        }
        Ok(())
    }
}

/// Mount the routes on an actix app.
pub fn configure<S: SecretStore>(cfg: &mut web::ServiceConfig, store: Data<S>, limits: Limits) {
    let json = web::JsonConfig::default()
        .limit(limits.max_size.saturating_add(ENVELOPE_OVERHEAD))
        .error_handler(json_error);

    cfg.app_data(store)
        .app_data(Data::new(limits))
        .app_data(json)
        .route("/health", web::get().to(health))
        .service(
            web::scope("/secrets")
                .route("", web::post().to(create_secret::<S>))
                .route("/{id}/consume", web::post().to(consume_secret::<S>)),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::ok())
}

async fn create_secret<S: SecretStore>(
    store: Data<S>,
    limits: Data<Limits>,
    body: Json<CreateSecretRequest>,
) -> HttpResponse {
    let CreateSecretRequest { payload } = body.into_inner();

    if let Err(e) = limits.check(&payload) {
        return error_response(e);
    }

    store.create(payload).await.map_or_else(error_response, |id| {
        info!("Created secret with id: {id}");
        HttpResponse::Ok().json(SecretId { id })
    })
}

async fn consume_secret<S: SecretStore>(id: Path<String>, store: Data<S>) -> HttpResponse {
    let id = id.into_inner();
    info!("Consuming secret with id: {id}");

    store
        .consume(&id)
        .await
        .map_or_else(error_response, |secret| HttpResponse::Ok().json(secret))
}

pub fn error_response(e: ServerError) -> HttpResponse {
    match e {
        ServerError::NotFound => {
            HttpResponse::NotFound().json(ErrorBody::new("not_found", NOT_FOUND_MESSAGE))
        }
        ServerError::EmptyPayload => {
            HttpResponse::BadRequest().json(ErrorBody::new("bad_request", e.to_string()))
        }
        ServerError::PayloadTooLarge(_) => {
            HttpResponse::PayloadTooLarge().json(ErrorBody::new("payload_too_large", e.to_string()))
        }
        ServerError::DatabaseError(e) => {
            error!("Database error: {e}");
            HttpResponse::InternalServerError()
                .json(ErrorBody::new("internal", "internal server error"))
        }
    }
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = match &err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            HttpResponse::PayloadTooLarge()
                .json(ErrorBody::new("payload_too_large", err.to_string()))
        }
        _ => HttpResponse::BadRequest().json(ErrorBody::new("bad_request", err.to_string())),
    };
    InternalError::from_response(err, response).into()
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use ember_shared::{ConsumedSecret, consume_path};

    use super::*;
    use crate::store::MemoryStore;

    const LIMITS: Limits = Limits { max_size: 64 };

    macro_rules! app {
        ($store:expr) => {
            test::init_service(App::new().configure(|cfg| configure(cfg, $store.clone(), LIMITS)))
                .await
        };
    }

    fn create_request(payload: &str) -> actix_web::test::TestRequest {
        test::TestRequest::post()
            .uri("/secrets")
            .set_json(CreateSecretRequest {
                payload: payload.to_string(),
            })
    }

    #[actix_web::test]
    async fn create_then_consume_once() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let created: SecretId =
            test::call_and_read_body_json(&app, create_request("sealed").to_request()).await;

        let req = test::TestRequest::post()
            .uri(&consume_path(&created.id))
            .to_request();
        let consumed: ConsumedSecret = test::call_and_read_body_json(&app, req).await;
        assert_eq!(consumed.payload, "sealed");

        let req = test::TestRequest::post()
            .uri(&consume_path(&created.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = test::read_body_json(resp).await;
        assert_eq!(body.kind, "not_found");
        assert_eq!(body.message, NOT_FOUND_MESSAGE);
    }

    #[actix_web::test]
    async fn there_is_no_peek_route() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let created: SecretId =
            test::call_and_read_body_json(&app, create_request("sealed").to_request()).await;

        for uri in [format!("/secrets/{}", created.id), consume_path(&created.id)] {
            let req = test::TestRequest::get().uri(&uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_client_error());
        }

        // Still there after the GETs.
        assert_eq!(store.consume(&created.id).await.unwrap().payload, "sealed");
    }

    #[actix_web::test]
    async fn malformed_id_is_not_found() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::post()
            .uri(&consume_path("not-a-ulid"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn empty_payload_is_rejected() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let resp = test::call_service(&app, create_request("").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn oversized_payload_is_rejected() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let resp = test::call_service(&app, create_request(&"a".repeat(65)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = test::call_service(&app, create_request(&"a".repeat(4096)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_web::test]
    async fn unbounded_limit_still_accepts_payloads() {
        let store = Data::new(MemoryStore::new());
        let limits = Limits {
            max_size: usize::MAX,
        };
        let app =
            test::init_service(App::new().configure(|cfg| configure(cfg, store.clone(), limits)))
                .await;

        let resp = test::call_service(&app, create_request(&"a".repeat(4096)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let store = Data::new(MemoryStore::new());
        let app = app!(store);

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, HealthResponse::ok());
    }
}
