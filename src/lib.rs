//! Gazette: a multi-backend cache with tag invalidation and a
//! popularity-aware article cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;

pub use gazette_types as types;
