//! AWS adapters and Lambda handlers for the account vending lifecycle.
//!
//! This crate owns runtime integration details (DynamoDB, SQS, Lambda,
//! Organizations/STS, event decoding and routing). Lifecycle semantics live in
//! `vending_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod observability;
pub mod services;
