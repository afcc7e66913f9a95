//! HTTP layer for the fitrank backend.
//!
//! This module provides the [`Transport`] seam used by the session manager,
//! the `reqwest`-backed [`ApiClient`], and the request/response types that
//! flow through it.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiResponse, HttpRequest, RequestOptions, Transport};
pub use error::{ApiError, TransportError};
pub use reqwest::Method;
