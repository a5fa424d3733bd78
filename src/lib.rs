//! Loan Risk Scoring API Library
//!
//! This library provides the scoring service behind the loan questionnaire:
//! the flat-file applicant store, the random forest trained on it, the
//! analytics charted next to a score, the HTTP handlers, and a typed client
//! for the front end.
//!
//! # Modules
//!
//! - `api`: API-layer components.
//! - `core`: Scoring logic and shared errors/models.
//! - `data`: Flat-file store and model artifacts.
//! - `integrations`: Client of the scoring service.
//! - `analytics`: Feature importance and accepted customer statistics.
//! - `artifact`: Checksummed model persistence.
//! - `client`: HTTP client for the scoring endpoints.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `features`: Feature engineering of questionnaire answers.
//! - `forest`: Random forest classifier.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `registry`: Lifecycle of the serving model.
//! - `store`: Append-only CSV store.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod analytics;
pub mod artifact;
pub mod client;
pub mod config;
pub mod errors;
pub mod features;
pub mod forest;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod store;
