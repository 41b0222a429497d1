//! Shared configuration, connection pools, error type and domain model.

pub mod config;
pub mod db;
pub mod error;
pub mod redis_pool;
pub mod types;
