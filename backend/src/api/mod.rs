//! # REST API Module
//!
//! This module defines all HTTP endpoints for the settlement service.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/payments` | Create a payment request |
//! | GET | `/payments/:id` | Payment status and received amount |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON. Amounts are integer litoshis.
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod routes;
pub mod handlers;

pub use handlers::json_error_handler;
pub use routes::configure_routes;
