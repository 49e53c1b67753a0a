//! Event correlation and sequence-integrity analytics for request/response
//! control-plane links.

pub mod agent;
pub mod config;
pub mod engine;
pub mod event;
pub mod export;
pub mod ingest;
