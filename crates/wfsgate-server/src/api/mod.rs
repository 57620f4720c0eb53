//! HTTP handlers for the gateway.

mod extract;
mod features;
mod health;
mod layers;
mod metrics;
mod router;
mod transaction;


pub use router::{create_router, AppState};
