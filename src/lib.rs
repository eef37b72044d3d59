//! Loan Scoring API Library
//!
//! Risk scoring and automatic decisions for microfinance loan applications:
//! a pluggable risk provider, a TTL score cache, threshold-based decisions and
//! the orchestrator tying them together, plus the HTTP handlers and storage
//! that record every decision.
//!
//! # Modules
//!
//! - `scoring`: Provider, cache, decision policy and orchestrator.
//! - `circuit_breaker`: Circuit breaker around the remote risk provider.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres application store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and router.
//! - `models`: Applicants, applications and request payloads.
//! - `storage`: Application store trait and in-memory store.
//! - `validation`: Input validation for application requests.

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod scoring;
pub mod storage;
pub mod validation;
