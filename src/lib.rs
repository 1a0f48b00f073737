//! Waypoint is a prefix-routing HTTP reverse proxy.
//!
//! It accepts HTTP/1.1 requests, picks the configured route with the
//! longest matching path prefix, rewrites the path with the route's
//! ordered regex rules, optionally presents the upstream's own host as
//! `Host`, and streams the exchange to and from the upstream without
//! buffering bodies. The route table is loaded once at startup and
//! shared read-only by every connection.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, validate, health).
//! - [`config`] -- Configuration data model, file parsing and validation.
//! - [`error`] -- Process-level and per-request error types using `thiserror`.
//! - [`health`] -- Built-in health endpoint returning runtime diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`proxy`] -- The proxy router: route matching, path rewriting, header
//!   construction and single-attempt streaming forwarding.
//! - [`server`] -- Axum server setup, shared application state, upstream HTTP
//!   client, and graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Public items are consumed by the binary and tests only.
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod proxy;
pub mod server;
