//! # API Models
//!
//! Request and response bodies for the REST API, kept apart from the
//! stored payment row so the encrypted key never reaches a client.
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! Field names are camelCase on the wire.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
