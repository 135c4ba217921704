//! Google Cloud access: credentials and a thin authenticated REST client

mod auth;
mod client;

pub use auth::{GcloudTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{GcpClient, service_name};
