//! Application services layered over the cache subsystem.

pub mod articles;
pub mod error;
