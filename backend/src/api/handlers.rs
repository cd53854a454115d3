//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the payment service
//! 3. Maps the result onto the response envelope
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "PAYMENT_NOT_FOUND",
//!         "message": "Payment not found: 550e8400-..."
//!     }
//! }
//! ```
//!
//! | Error | Status | Code |
//! |-------|--------|------|
//! | Bad amount | 400 | `INVALID_AMOUNT` |
//! | Malformed id | 400 | `INVALID_PAYMENT_ID` |
//! | Unknown id | 404 | `PAYMENT_NOT_FOUND` |
//! | Indexer unreachable | 502 | `CHAIN_UNAVAILABLE` |
//! | Anything else | 500 | `INTERNAL_ERROR` |

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{error, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{ApiResponse, CreatePaymentRequest, HealthResponse};
use crate::services::SettlementError;
use crate::AppState;

/// Map a service error onto a status code and error code.
fn error_response(e: &SettlementError) -> HttpResponse {
    let (status, code) = match e {
        SettlementError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        SettlementError::NotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
        SettlementError::ChainUnavailable(_) | SettlementError::Chain(_) => {
            (StatusCode::BAD_GATEWAY, "CHAIN_UNAVAILABLE")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
        "Internal server error".to_string()
    } else {
        e.to_string()
    };

    HttpResponse::build(status).json(ApiResponse::<()>::error(code, &message))
}

/// Reject unreadable JSON bodies with the same envelope as other errors.
///
/// A missing, fractional or non-numeric `amount` counts as an invalid amount.
pub fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> error::Error {
    let message = err.to_string();
    let response =
        HttpResponse::BadRequest().json(ApiResponse::<()>::error("INVALID_AMOUNT", &message));
    error::InternalError::from_response(err, response).into()
}

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Litecoin Settlement API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Single-use Litecoin receiving addresses with automatic sweeping",
        "endpoints": {
            "health": {
                "method": "GET",
                "path": "/health",
                "description": "Health check endpoint"
            },
            "payments": {
                "create": {
                    "method": "POST",
                    "path": "/payments",
                    "description": "Create a payment request (amount in litoshis)"
                },
                "status": {
                    "method": "GET",
                    "path": "/payments/{id}",
                    "description": "Get payment status, received amount and confirmations"
                }
            }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "database": true,
///         "electrum": true,
///         "version": "0.1.0",
///         "timestamp": "2025-12-08T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let (database, electrum) = state.payments.health().await;
    let healthy = database && electrum;

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database,
        electrum,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// Create a payment request.
///
/// ## Endpoint
///
/// `POST /payments`
///
/// ```bash
/// curl -X POST http://127.0.0.1:3000/payments \
///   -H "Content-Type: application/json" \
///   -d '{"amount": 50000000}'
/// ```
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "id": "550e8400-e29b-41d4-a716-446655440000",
///         "address": "ltc1q...",
///         "amount": 50000000,
///         "formattedAmount": "0.50000000 LTC",
///         "expiresAt": null
///     }
/// }
/// ```
pub async fn create_payment(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreatePaymentRequest>,
) -> HttpResponse {
    info!("Create payment request: {} litoshis", body.amount);

    match state.payments.create_payment(body.amount).await {
        Ok(created) => HttpResponse::Ok().json(ApiResponse::success(created)),
        Err(e) => {
            match &e {
                SettlementError::Validation(_) => warn!("Create payment rejected: {}", e),
                _ => error!("Create payment failed: {}", e),
            }
            error_response(&e)
        }
    }
}

/// Get the current state of a payment.
///
/// ## Endpoint
///
/// `GET /payments/{id}`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "id": "550e8400-e29b-41d4-a716-446655440000",
///         "address": "ltc1q...",
///         "requestedAmount": 50000000,
///         "receivedAmount": 50000000,
///         "formattedReceived": "0.50000000 LTC",
///         "status": "pending",
///         "confirmations": 1,
///         "confirmationsNeeded": 2,
///         "createdAt": "2025-12-08T12:00:00Z",
///         "updatedAt": "2025-12-08T12:00:00Z",
///         "expiresAt": null
///     }
/// }
/// ```
pub async fn get_payment(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match Uuid::parse_str(&path) {
        Ok(id) => id,
        Err(_) => {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                "INVALID_PAYMENT_ID",
                "Payment id must be a UUID",
            ))
        }
    };

    match state.payments.get_payment_view(id).await {
        Ok(view) => HttpResponse::Ok().json(ApiResponse::success(view)),
        Err(e) => {
            match &e {
                SettlementError::NotFound(_) => {}
                SettlementError::ChainUnavailable(_) => warn!("Payment lookup {}: {}", id, e),
                _ => error!("Payment lookup {} failed: {}", id, e),
            }
            error_response(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::chain::fake::FakeChain;
    use crate::db::memory::MemoryStore;
    use crate::services::test_support::vault;
    use crate::services::PaymentService;
    use actix_web::{test, App};
    use serde_json::Value;

    fn state(chain: Arc<FakeChain>) -> Arc<AppState> {
        Arc::new(AppState {
            payments: PaymentService::new(
                Arc::new(MemoryStore::new()),
                chain,
                vault(),
                2,
                0,
            ),
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_create_then_get_payment() {
        let app = app!(state(Arc::new(FakeChain::new(1000))));

        let req = test::TestRequest::post()
            .uri("/payments")
            .set_json(json!({"amount": 50_000_000}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert!(body["data"]["address"].as_str().unwrap().starts_with("ltc1q"));

        let req = test::TestRequest::get()
            .uri(&format!("/payments/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["requestedAmount"], 50_000_000);
        assert_eq!(body["data"]["receivedAmount"], 0);
        assert_eq!(body["data"]["confirmationsNeeded"], 2);
        assert!(body["data"].get("encryptedKey").is_none());
    }

    #[actix_web::test]
    async fn test_invalid_amounts_are_rejected() {
        let app = app!(state(Arc::new(FakeChain::new(1000))));

        for payload in [json!({"amount": 0}), json!({"amount": -5}), json!({"amount": 0.5}), json!({})] {
            let req = test::TestRequest::post()
                .uri("/payments")
                .set_json(payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["success"], false);
            assert_eq!(body["error"]["code"], "INVALID_AMOUNT");
        }
    }

    #[actix_web::test]
    async fn test_unknown_and_malformed_ids() {
        let app = app!(state(Arc::new(FakeChain::new(1000))));

        let req = test::TestRequest::get()
            .uri(&format!("/payments/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/payments/not-a-uuid").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_chain_outage_is_bad_gateway() {
        let chain = Arc::new(FakeChain::new(1000));
        let app = app!(state(chain.clone()));

        let req = test::TestRequest::post()
            .uri("/payments")
            .set_json(json!({"amount": 1_000}))
            .to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        chain.set_unavailable(true);
        let req = test::TestRequest::get()
            .uri(&format!("/payments/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
