//! Pooled async Redis client with pipelining
//!
//! `redis-keeper` gives applications bounded, recycled connections to one
//! Redis endpoint, a single-command executor on top of them, and pipelines
//! that batch commands over one connection with per-command error
//! attribution and bounded retry.
//!
//! # Features
//!
//! - Bounded pool with a caller-side wait budget when exhausted
//! - Liveness probe before reusing connections that sat idle
//! - Pipelines that retry on transport failure only, never on error replies
//! - Distinct conditions for absent values, non-OK acknowledgements,
//!   pool exhaustion and transport failures
//! - Pluggable transport through [`ConnectionFactory`]
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_keeper::{Client, ConnectionConfig, PoolConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379").with_pool_config(
//!         PoolConfig::default()
//!             .with_max_active(16)
//!             .with_wait_timeout(Duration::from_millis(500)),
//!     );
//!     let client = Client::new(config).await?;
//!
//!     client.set("mykey", "myvalue").await?;
//!     match client.get("other").await {
//!         Ok(value) => println!("Value: {value}"),
//!         Err(e) if client.is_nil(&e) => println!("not set"),
//!         Err(e) => return Err(e.into()),
//!     }
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod commands;
pub mod connection;
pub mod executor;
pub mod pipeline;
pub mod pool;
pub mod protocol;

#[cfg(test)]
mod mock;

pub use client::Client;
pub use connection::{Connection, ConnectionFactory, TcpConnection, TcpConnector};
pub use executor::Executor;
pub use pipeline::{CommandResult, Pipeline, PipelineResult};
pub use pool::{Pool, PoolStats, PooledConnection};

pub use redis_keeper_core::{
    config::{ConnectionConfig, PoolConfig, PoolSettings},
    error::{RedisError, RedisResult},
    types::{Command, CommandArg},
    value::RespValue,
};
