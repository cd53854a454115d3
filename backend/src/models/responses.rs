//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::PaymentStatus;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INVALID_AMOUNT",
///         "message": "Amount must be greater than 0"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "INVALID_AMOUNT").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// A newly created payment.
///
/// Returned by `POST /payments`
///
/// ## Example Response
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
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub id: Uuid,

    /// Address the payer should send to.
    pub address: String,

    /// Requested amount in litoshis.
    pub amount: i64,

    pub formatted_amount: String,

    pub expires_at: Option<DateTime<Utc>>,
}

/// Current state of a payment.
///
/// Returned by `GET /payments/:id`
///
/// ## Example Response
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
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub id: Uuid,

    pub address: String,

    /// Requested amount in litoshis.
    pub requested_amount: i64,

    /// Confirmed plus unconfirmed litoshis seen at the address.
    pub received_amount: u64,

    pub formatted_received: String,

    pub status: PaymentStatus,

    /// Shallowest confirmed transaction depth, 0 if none.
    pub confirmations: u64,

    pub confirmations_needed: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Database connection status.
    pub database: bool,

    /// Electrum server connection status.
    pub electrum: bool,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}
