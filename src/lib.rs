//! AGENTMARKET — Prediction Market Trading & Resolution Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod store;
pub mod types;
