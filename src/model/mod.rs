//! Core data model: fetched messages, classification results, and warehouse rows.

pub mod address;
pub mod classification;
pub mod message;
pub mod record;
