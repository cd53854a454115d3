//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health              GET - Health check
/// └── /payments
///     ├── (root)           POST - Create payment request
///     └── /{id}            GET - Payment status
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Payment endpoints
        .service(
            web::scope("/payments")
                .route("", web::post().to(handlers::create_payment))
                .route("/{id}", web::get().to(handlers::get_payment)),
        );
}
