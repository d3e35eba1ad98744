//! Metricstore Common - Shared types and utilities
//!
//! This crate provides the data model, error definitions, configuration and
//! the small JSON/time helpers used by the storage engine and the cache.

pub mod config;
pub mod error;
pub mod interval;
pub mod path;
pub mod timestamp;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use interval::{Interval, split_by_day, start_of_day, truncate_to_minute};
pub use path::{JsonPath, text_value};
pub use timestamp::TimestampFunction;
pub use types::*;
