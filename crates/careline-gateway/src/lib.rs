//! HTTP transport for CareLine agents.
//!
//! [`GatewayServer`] exposes one agent over HTTP; [`HttpEndpoint`] and
//! [`HttpResolver`] let an agent reach its peers the same way.

/// reqwest-backed peer endpoints.
pub mod client;
/// axum routes for one agent.
pub mod server;

pub use client::{agent_url, HttpEndpoint, HttpResolver};
pub use server::{AppState, GatewayServer};
