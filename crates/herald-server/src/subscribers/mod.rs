//! Ingestion sources: producers hand events to the dispatcher through these.

pub mod http;
pub mod redis;
