//! Komunalka Period Data API Library
//!
//! Stores and serves per-apartment utility billing records ("period data")
//! in PostgreSQL, keyed by apartment, billing period and item.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `db`: Connection pool and schema bootstrap.
//! - `db_storage`: Period record queries and the atomic batch upsert.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Records, request and response models.
//! - `server`: Router, middleware and shutdown signal.
//! - `validation`: Shape checks for submitted records and query parameters.

pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod server;
pub mod validation;
