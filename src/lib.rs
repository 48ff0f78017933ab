//! Versioned-key fragment and request caching over a key-value store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
