//! HTTP API handlers for the review gate
//!
//! - `GET /health`
//! - `GET /segments/:id/record`, `/record/:version`, `/versions`, `/review`
//! - `POST /segments/:id/corrections`

pub mod health;
pub mod records;

pub use health::health_routes;
pub use records::record_routes;
