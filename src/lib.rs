//! Visual Review Server library.
//!
//! Build lifecycle and screenshot-diff status engine: screenshot buckets,
//! base pairing, diff classification, derived build status and per-test
//! stability history, served over an Actix-web API.

pub mod api;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;
