//! Activity trail API
//!
//! Ingests interaction events from browser producers, keeps them in a
//! bounded ring buffer or a SQLite file, and derives per-session views.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod projections;
pub mod retention;
pub mod store;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{Result, TrailError};
