//! Axum HTTP server: routing, handlers, and shared state.
//!
//! # Responsibilities
//! - Define the router with all routes and shared middleware.
//! - Parse and validate the upload/download/auth request surfaces.
//! - Map internal failures onto the stable numeric API error codes.

pub mod auth;
pub mod download;
pub mod limit;
pub mod reply;
pub mod router;
pub mod state;
pub mod upload;

#[cfg(test)]
pub(crate) mod testkit;
