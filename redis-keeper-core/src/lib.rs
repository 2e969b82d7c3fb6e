//! Core types for the redis-keeper pooled Redis client
//!
//! This crate provides the configuration, error taxonomy, reply values and
//! command model shared by the pool, executor and pipeline.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{ConnectionConfig, PoolConfig, PoolSettings};
pub use error::{RedisError, RedisResult};
pub use types::{Command, CommandArg};
pub use value::RespValue;
