//! # Commvault Exporter
//!
//! A multi-target Prometheus probe exporter for Commvault CommServe REST APIs.
//!
//! ## Overview
//!
//! This crate bridges Commvault's backup-management REST API to the
//! Prometheus pull model. Each `/probe?target=<name>` request authenticates
//! against the named backend, fetches status and job data concurrently, and
//! renders the result as a Prometheus exposition document:
//!
//! - System/version info for the probed CommServe
//! - VM pseudo-client inventory with status and activity control
//! - Finished-job history (status, duration, sizes, failure counts)
//!
//! Session tokens are cached per target across probes; everything else is
//! fetched fresh and scoped to a single request.
//!
//! ## Quick Start
//!
//! ```no_run
//! use commvault_exporter::{config::Settings, server::{start_server, AppState}, token_cache::TokenCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration
//!     let settings = Settings::load(Some("config/default.toml"))?;
//!
//!     let state = AppState {
//!         settings: Arc::new(settings),
//!         token_cache: Arc::new(TokenCache::new()),
//!     };
//!
//!     // Start HTTP server
//!     start_server("0.0.0.0:9657", state).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter can be configured via:
//! - TOML configuration file (a `[targets.<name>]` table per backend)
//! - Environment variables (with `COMMVAULT_EXPORTER_` prefix)
//! - Command-line arguments
//!
//! See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`client`] - Commvault API client (login + authenticated fetches)
//! - [`collector`] - Per-probe collector and metric families
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`server`] - HTTP server exposing the probe endpoint
//! - [`token_cache`] - Shared per-target authentication-token cache

pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod server;
pub mod token_cache;

pub use error::{CvError, Result};
