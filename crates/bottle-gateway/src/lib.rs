//! # Bottlemail Gateway
//! Thin JSON API over the mailbox service.
//! The caller's identity comes from a header set by an upstream auth layer.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
