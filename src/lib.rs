//! `mailharvest` — ingest a staffing inbox into structured warehouse records.
//!
//! This crate provides the decoding, fingerprinting, classification,
//! attachment handling and persistence steps, plus a driver that runs them
//! over one mailbox fetch.

pub mod attachment;
pub mod classify;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod warehouse;
