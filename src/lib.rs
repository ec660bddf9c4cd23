//! Cantina: the caching core of a food-ordering backend.
//!
//! Serves the public menu surface through a TTL-based response cache backed
//! by an injectable key-value store, with targeted invalidation, proactive
//! warming, and an operator admin surface.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
