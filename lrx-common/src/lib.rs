//! # LRX Common Library
//!
//! Shared code for the LRX (Learning Record Exchange) pipeline:
//! - Database schema, models and settings
//! - xAPI statement document types
//! - Event types (EtlEvent enum) and the broadcast EventBus
//! - Configuration loading and root folder resolution

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod xapi;

pub use error::{Error, Result};
