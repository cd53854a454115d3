//! # API Request Models
//!
//! Structures for incoming API request bodies.

use serde::{Deserialize, Serialize};

/// Request to create a payment.
///
/// ## Example JSON
///
/// ```json
/// {
///     "amount": 50000000
/// }
/// ```
///
/// ## Notes
///
/// - `amount` is in litoshis (8 decimals)
/// - 1 LTC = 100,000,000
/// - Must be greater than 0
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Requested amount in litoshis.
    pub amount: i64,
}
