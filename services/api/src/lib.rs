//! services/api/src/lib.rs
//!
//! The HTTP and WebSocket edge of the ride-share service, plus the PostgreSQL
//! adapters behind the core ports.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
