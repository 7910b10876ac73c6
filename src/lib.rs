//! PDF Joiner Server Library
//!
//! This crate exposes the core registries and services for testing.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `session`: Session-scoped file registry with filesystem reconstruction
//! - `thumbnail`: On-demand, cache-coherent page thumbnail generation
//! - `merge`: Merge job registry and synchronous merge pipeline
//! - `pdf`: Rendering gateway over MuPDF (raster) and lopdf (assembly)

pub mod config;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod pdf;
pub mod routes;
pub mod session;
pub mod state;
pub mod thumbnail;
pub mod util;
