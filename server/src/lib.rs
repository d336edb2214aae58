//! FIM Server - Dashboard query API.
//!
//! This crate provides the server component of the file integrity monitor,
//! responsible for:
//! - Listing recent events with type and text filters
//! - Summarizing the latest state of every watched file
//! - Managing classification labels attached to files
//!
//! # Architecture
//!
//! The server reads the SQLite event store written by `fim-monitor`. Events
//! are never modified here; only the classification table is writable.

pub mod config;
pub mod error;
pub mod routes;
